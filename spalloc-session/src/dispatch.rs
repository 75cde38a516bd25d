//! The dispatch table (spec §4.5): one `inner_*` handler per wire command,
//! each producing the JSON value that goes into `{"return": ...}`.
//!
//! Mirrors `nativelink-service::cas_server`'s split between a thin public
//! entry point and an `inner_*` function that does the work and returns a
//! plain `Result` — the outer `dispatch` call is the single place that
//! turns an `Err` into the session's `ExceptionResponse`.

use std::collections::HashSet;
use std::time::Duration;

use serde_json::{json, Value};

use spalloc_error::{error_if, make_input_err, make_not_found_err, Error};
use spalloc_facade::{BoardLocation, BoardSpec, Chip, JobDescriptor, MachineSelector, Physical, PowerState, Triad};
use spalloc_util::time::encode_timestamp;
use spalloc_wire::args::{get_keyword, get_keyword_opt, get_positional, parse_dec, parse_dec_required};
use spalloc_wire::Command;

use crate::context::SessionContext;

pub async fn dispatch(ctx: &SessionContext, cmd: &Command, raw_line: &[u8]) -> Result<Value, Error> {
    match cmd.command.as_str() {
        "version" => Ok(version()),
        "create_job" => inner_create_job(ctx, cmd, raw_line).await,
        "destroy_job" => inner_destroy_job(ctx, cmd).await,
        "get_board_at_position" => inner_get_board_at_position(ctx, cmd).await,
        "get_board_position" => inner_get_board_position(ctx, cmd).await,
        "get_job_machine_info" => inner_get_job_machine_info(ctx, cmd).await,
        "get_job_state" => inner_get_job_state(ctx, cmd).await,
        "job_keepalive" => inner_job_keepalive(ctx, cmd).await,
        "list_jobs" => inner_list_jobs(ctx).await,
        "list_machines" => inner_list_machines(ctx).await,
        "power_on_job_boards" => inner_set_power(ctx, cmd, PowerState::On).await,
        "power_off_job_boards" => inner_set_power(ctx, cmd, PowerState::Off).await,
        "where_is" => inner_where_is(ctx, cmd).await,
        other => Err(make_input_err!("unknown command: {other}")),
    }
}

fn version() -> Value {
    Value::String(env!("CARGO_PKG_VERSION").to_string())
}

fn validate_owner(owner: &str) -> Result<(), Error> {
    error_if!(owner.is_empty(), "bad input: owner must not be empty");
    error_if!(
        !owner.chars().all(|c| c.is_ascii_graphic() || c == ' '),
        "bad input: owner must be printable ASCII"
    );
    Ok(())
}

async fn inner_create_job(ctx: &SessionContext, cmd: &Command, raw_line: &[u8]) -> Result<Value, Error> {
    let owner = get_keyword(&cmd.kwargs, "owner")?
        .as_str()
        .ok_or_else(|| make_input_err!("bad input: owner must be a string"))?;
    validate_owner(owner)?;

    let keepalive = match get_keyword_opt(&cmd.kwargs, "keepalive") {
        Some(v) => {
            let secs = v
                .as_f64()
                .ok_or_else(|| make_input_err!("bad input: keepalive must be a number"))?;
            error_if!(secs < 0.0, "bad input: keepalive must not be negative");
            Duration::from_secs_f64(secs)
        }
        None => ctx.default_keepalive,
    };

    let machine = get_keyword_opt(&cmd.kwargs, "machine")
        .map(|v| {
            v.as_str()
                .map(str::to_string)
                .ok_or_else(|| make_input_err!("bad input: machine must be a string"))
        })
        .transpose()?;
    let tags = get_keyword_opt(&cmd.kwargs, "tags")
        .map(|v| {
            v.as_array()
                .ok_or_else(|| make_input_err!("bad input: tags must be an array"))?
                .iter()
                .map(|t| {
                    t.as_str()
                        .map(str::to_string)
                        .ok_or_else(|| make_input_err!("bad input: tags must be strings"))
                })
                .collect::<Result<HashSet<String>, Error>>()
        })
        .transpose()?;
    error_if!(
        machine.is_some() && tags.is_some(),
        "bad input: machine and tags are mutually exclusive"
    );
    let selector = match (machine, tags) {
        (Some(name), None) => MachineSelector::Hint(name),
        (None, Some(tags)) => MachineSelector::Tags(tags),
        (None, None) => MachineSelector::default(),
        (Some(_), Some(_)) => unreachable!("checked above"),
    };

    let max_dead_boards = get_keyword_opt(&cmd.kwargs, "max_dead_boards")
        .map(parse_dec_required)
        .transpose()?
        .map(|n| n as u32);

    let descriptor = match cmd.args.len() {
        0 => JobDescriptor::NumBoards {
            num_boards: 1,
            max_dead_boards,
        },
        1 => JobDescriptor::NumBoards {
            num_boards: parse_dec_required(get_positional(&cmd.args, 0)?)? as u32,
            max_dead_boards,
        },
        2 => JobDescriptor::Dimensions {
            width: parse_dec_required(get_positional(&cmd.args, 0)?)? as u32,
            height: parse_dec_required(get_positional(&cmd.args, 1)?)? as u32,
            max_dead_boards,
        },
        3 => {
            let x = parse_dec_required(get_positional(&cmd.args, 0)?)? as u32;
            let y = parse_dec_required(get_positional(&cmd.args, 1)?)? as u32;
            let z = parse_dec_required(get_positional(&cmd.args, 2)?)? as u8;
            JobDescriptor::SpecificBoard(BoardSpec::Triad(Triad::new(x, y, z)?))
        }
        n => return Err(make_input_err!("bad input: unsupported argument count {n} for create_job")),
    };

    let id = ctx
        .facade
        .create_job(&ctx.principal.0, None, descriptor, selector, keepalive, Some(raw_line.to_vec()))
        .await?;
    Ok(match id {
        Some(id) => Value::from(id),
        None => Value::Null,
    })
}

async fn lookup_job(ctx: &SessionContext, id: u64) -> Result<std::sync::Arc<dyn spalloc_facade::Job>, Error> {
    ctx.facade
        .get_job(&ctx.principal.0, id)
        .await?
        .ok_or_else(|| make_not_found_err!("no such job"))
}

async fn lookup_machine(ctx: &SessionContext, name: &str) -> Result<std::sync::Arc<dyn spalloc_facade::Machine>, Error> {
    ctx.facade
        .get_machine(name)
        .await?
        .ok_or_else(|| make_not_found_err!("no such machine"))
}

async fn inner_destroy_job(ctx: &SessionContext, cmd: &Command) -> Result<Value, Error> {
    let id = parse_dec_required(get_positional(&cmd.args, 0)?)?;
    let reason = get_keyword_opt(&cmd.kwargs, "reason")
        .map(|v| {
            v.as_str()
                .map(str::to_string)
                .ok_or_else(|| make_input_err!("bad input: reason must be a string"))
        })
        .transpose()?;
    let job = lookup_job(ctx, id).await?;
    job.destroy(reason).await?;
    Ok(Value::Null)
}

fn kwarg_u32(kwargs: &std::collections::HashMap<String, Value>, key: &str) -> Result<u32, Error> {
    Ok(parse_dec_required(get_keyword(kwargs, key)?)? as u32)
}

fn kwarg_str<'a>(kwargs: &'a std::collections::HashMap<String, Value>, key: &str) -> Result<&'a str, Error> {
    get_keyword(kwargs, key)?
        .as_str()
        .ok_or_else(|| make_input_err!("bad input: {key} must be a string"))
}

async fn inner_get_board_at_position(ctx: &SessionContext, cmd: &Command) -> Result<Value, Error> {
    let machine_name = kwarg_str(&cmd.kwargs, "machine_name")?;
    let physical = Physical {
        cabinet: kwarg_u32(&cmd.kwargs, "x")?,
        frame: kwarg_u32(&cmd.kwargs, "y")?,
        board: kwarg_u32(&cmd.kwargs, "z")?,
    };
    let machine = lookup_machine(ctx, machine_name).await?;
    let triad = machine
        .get_board_by_physical(physical)
        .await
        .ok_or_else(|| make_not_found_err!("no such board"))?;
    Ok(json!({"x": triad.x, "y": triad.y, "z": triad.z}))
}

async fn inner_get_board_position(ctx: &SessionContext, cmd: &Command) -> Result<Value, Error> {
    let machine_name = kwarg_str(&cmd.kwargs, "machine_name")?;
    let triad = Triad::new(
        kwarg_u32(&cmd.kwargs, "x")?,
        kwarg_u32(&cmd.kwargs, "y")?,
        kwarg_u32(&cmd.kwargs, "z")? as u8,
    )?;
    let machine = lookup_machine(ctx, machine_name).await?;
    let physical = machine
        .get_board_by_logical(triad)
        .await
        .ok_or_else(|| make_not_found_err!("no such board"))?;
    Ok(json!({"cabinet": physical.cabinet, "frame": physical.frame, "board": physical.board}))
}

async fn inner_get_job_machine_info(ctx: &SessionContext, cmd: &Command) -> Result<Value, Error> {
    let id = parse_dec_required(get_positional(&cmd.args, 0)?)?;
    let job = lookup_job(ctx, id).await?;
    let sub = job
        .get_machine()
        .await
        .ok_or_else(|| make_not_found_err!("boards not allocated"))?;
    let boards: Vec<Value> = sub
        .boards()
        .await
        .into_iter()
        .map(|t| json!({"x": t.x, "y": t.y, "z": t.z}))
        .collect();
    let connections: Vec<Value> = sub
        .connections()
        .await
        .into_iter()
        .map(|(chip, host)| json!([{"x": chip.x, "y": chip.y}, host]))
        .collect();
    Ok(json!({
        "machine_name": sub.machine_name(),
        "boards": boards,
        "connections": connections,
        "width": sub.width(),
        "height": sub.height(),
        "power": power_str(sub.get_power().await),
    }))
}

fn power_str(state: PowerState) -> &'static str {
    match state {
        PowerState::On => "ON",
        PowerState::Off => "OFF",
    }
}

async fn job_state_json(job: &dyn spalloc_facade::Job) -> Value {
    let power = match job.get_machine().await {
        Some(sub) => Some(power_str(sub.get_power().await)),
        None => None,
    };
    json!({
        "state": job.state().await.as_str(),
        "power": power,
        "keepalive": encode_timestamp(job.keepalive_timestamp().await),
        "keepalive_host": job.keepalive_host().await,
        "reason": job.reason().await,
        "start_time": encode_timestamp(job.start_time().await),
    })
}

async fn inner_get_job_state(ctx: &SessionContext, cmd: &Command) -> Result<Value, Error> {
    let id = parse_dec_required(get_positional(&cmd.args, 0)?)?;
    let job = lookup_job(ctx, id).await?;
    // Returns state only: one source variant of this handler fell through
    // into job_keepalive's body (spec §9) — that fall-through is not
    // reproduced here.
    Ok(job_state_json(job.as_ref()).await)
}

async fn inner_job_keepalive(ctx: &SessionContext, cmd: &Command) -> Result<Value, Error> {
    let id = parse_dec_required(get_positional(&cmd.args, 0)?)?;
    let job = lookup_job(ctx, id).await?;
    job.access(ctx.peer_addr.clone()).await?;
    Ok(Value::Null)
}

async fn inner_set_power(ctx: &SessionContext, cmd: &Command, state: PowerState) -> Result<Value, Error> {
    let id = parse_dec_required(get_positional(&cmd.args, 0)?)?;
    let job = lookup_job(ctx, id).await?;
    let sub = job
        .get_machine()
        .await
        .ok_or_else(|| make_not_found_err!("boards not allocated"))?;
    sub.set_power(state).await?;
    Ok(Value::Null)
}

async fn inner_list_jobs(ctx: &SessionContext) -> Result<Value, Error> {
    let list = ctx.facade.get_jobs(false, None, 0).await?;
    let mut out = Vec::new();
    for job in list.jobs() {
        let mut entry = job_state_json(job.as_ref()).await;
        entry["job_id"] = Value::from(job.id());
        out.push(entry);
    }
    Ok(Value::Array(out))
}

async fn inner_list_machines(ctx: &SessionContext) -> Result<Value, Error> {
    let machines = ctx.facade.get_machines().await?;
    let mut out = Vec::new();
    for (name, machine) in machines {
        out.push(json!({
            "name": name,
            "tags": machine.tags().iter().collect::<Vec<_>>(),
            "width": machine.width(),
            "height": machine.height(),
            "dead_boards": machine.dead_boards().len(),
            "down_links": machine.down_links().len(),
        }));
    }
    Ok(Value::Array(out))
}

fn board_location_json(loc: &BoardLocation) -> Value {
    json!({
        "machine": loc.machine,
        "logical": {"x": loc.logical.x, "y": loc.logical.y, "z": loc.logical.z},
        "physical": {"cabinet": loc.physical.cabinet, "frame": loc.physical.frame, "board": loc.physical.board},
        "chip": {"x": loc.chip.x, "y": loc.chip.y},
        "board_chip": {"x": loc.board_chip.x, "y": loc.board_chip.y},
        "job_id": loc.job_id,
        "job_chip": loc.job_chip.map(|c| json!({"x": c.x, "y": c.y})),
    })
}

async fn inner_where_is(ctx: &SessionContext, cmd: &Command) -> Result<Value, Error> {
    let job_id = get_keyword_opt(&cmd.kwargs, "job_id")
        .map(parse_dec)
        .transpose()?
        .flatten();
    let machine = get_keyword_opt(&cmd.kwargs, "machine")
        .map(|v| {
            v.as_str()
                .map(str::to_string)
                .ok_or_else(|| make_input_err!("bad input: machine must be a string"))
        })
        .transpose()?;
    error_if!(
        job_id.is_none() && machine.is_none(),
        "bad input: where_is requires job_id or machine"
    );

    // job_id wins when both are given (spec §8 boundary behaviour).
    if let Some(id) = job_id {
        let chip_x = kwarg_u32(&cmd.kwargs, "chip_x")?;
        let chip_y = kwarg_u32(&cmd.kwargs, "chip_y")?;
        let job = lookup_job(ctx, id).await?;
        let loc = job
            .where_is(chip_x, chip_y)
            .await?
            .ok_or_else(|| make_not_found_err!("no such board"))?;
        return Ok(board_location_json(&loc));
    }

    let machine_name = machine.expect("checked above");
    let machine = lookup_machine(ctx, &machine_name).await?;

    let (triad, physical, chip) = if let (Some(cx), Some(cy)) = (
        get_keyword_opt(&cmd.kwargs, "chip_x"),
        get_keyword_opt(&cmd.kwargs, "chip_y"),
    ) {
        let chip_x = parse_dec_required(cx)? as u32;
        let chip_y = parse_dec_required(cy)? as u32;
        let physical = machine
            .get_board_by_chip(chip_x, chip_y)
            .await
            .ok_or_else(|| make_not_found_err!("no such board"))?;
        let triad = machine
            .get_board_by_physical(physical)
            .await
            .ok_or_else(|| make_not_found_err!("no such board"))?;
        (
            triad,
            physical,
            Chip {
                x: chip_x % 8,
                y: chip_y % 8,
            },
        )
    } else if cmd.kwargs.contains_key("x") {
        let triad = Triad::new(
            kwarg_u32(&cmd.kwargs, "x")?,
            kwarg_u32(&cmd.kwargs, "y")?,
            kwarg_u32(&cmd.kwargs, "z")? as u8,
        )?;
        let physical = machine
            .get_board_by_logical(triad)
            .await
            .ok_or_else(|| make_not_found_err!("no such board"))?;
        (triad, physical, Chip { x: 0, y: 0 })
    } else if cmd.kwargs.contains_key("cabinet") {
        let physical = Physical {
            cabinet: kwarg_u32(&cmd.kwargs, "cabinet")?,
            frame: kwarg_u32(&cmd.kwargs, "frame")?,
            board: kwarg_u32(&cmd.kwargs, "board")?,
        };
        let triad = machine
            .get_board_by_physical(physical)
            .await
            .ok_or_else(|| make_not_found_err!("no such board"))?;
        (triad, physical, Chip { x: 0, y: 0 })
    } else {
        return Err(make_input_err!(
            "bad input: where_is needs chip_x/chip_y, x/y/z, or cabinet/frame/board"
        ));
    };

    Ok(board_location_json(&BoardLocation {
        machine: machine.name().to_string(),
        logical: triad,
        physical,
        chip,
        board_chip: chip,
        job_id: None,
        job_chip: None,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration as StdDuration;

    use spalloc_facade::memory::{MachineSeed, MemoryFacade};

    fn ctx() -> SessionContext {
        SessionContext {
            facade: Arc::new(MemoryFacade::new(vec![MachineSeed {
                name: "m1".to_string(),
                tags: HashSet::from(["default".to_string()]),
                width: 2,
                height: 2,
            }])),
            principal: crate::context::Principal("alice".to_string()),
            peer_addr: None,
            default_keepalive: StdDuration::from_secs(60),
        }
    }

    fn command(name: &str, args: Vec<Value>, kwargs: HashMap<String, Value>) -> Command {
        Command {
            command: name.to_string(),
            args,
            kwargs,
        }
    }

    #[tokio::test]
    async fn create_job_with_four_args_is_bad_input() {
        let ctx = ctx();
        let mut kwargs = HashMap::new();
        kwargs.insert("owner".to_string(), json!("alice"));
        let cmd = command("create_job", vec![json!(1), json!(2), json!(3), json!(4)], kwargs);
        let err = dispatch(&ctx, &cmd, b"{}").await.unwrap_err();
        assert_eq!(err.code, spalloc_error::Code::InvalidArgument);
    }

    #[tokio::test]
    async fn create_job_rejects_machine_and_tags_together() {
        let ctx = ctx();
        let mut kwargs = HashMap::new();
        kwargs.insert("owner".to_string(), json!("alice"));
        kwargs.insert("machine".to_string(), json!("m1"));
        kwargs.insert("tags".to_string(), json!(["default"]));
        let cmd = command("create_job", vec![], kwargs);
        let err = dispatch(&ctx, &cmd, b"{}").await.unwrap_err();
        assert_eq!(err.code, spalloc_error::Code::InvalidArgument);
    }

    #[tokio::test]
    async fn create_job_rejects_non_printable_owner() {
        let ctx = ctx();
        let mut kwargs = HashMap::new();
        kwargs.insert("owner".to_string(), json!("alice\n"));
        let cmd = command("create_job", vec![], kwargs);
        let err = dispatch(&ctx, &cmd, b"{}").await.unwrap_err();
        assert_eq!(err.code, spalloc_error::Code::InvalidArgument);
    }

    #[tokio::test]
    async fn where_is_with_neither_job_id_nor_machine_is_bad_input() {
        let ctx = ctx();
        let cmd = command("where_is", vec![], HashMap::new());
        let err = dispatch(&ctx, &cmd, b"{}").await.unwrap_err();
        assert_eq!(err.code, spalloc_error::Code::InvalidArgument);
    }

    #[tokio::test]
    async fn where_is_job_id_wins_over_machine() {
        let ctx = ctx();
        let id = ctx
            .facade
            .create_job(
                "alice",
                None,
                JobDescriptor::NumBoards {
                    num_boards: 1,
                    max_dead_boards: None,
                },
                MachineSelector::default(),
                StdDuration::from_secs(60),
                None,
            )
            .await
            .unwrap()
            .unwrap();
        let mut kwargs = HashMap::new();
        kwargs.insert("job_id".to_string(), json!(id));
        kwargs.insert("machine".to_string(), json!("does-not-exist"));
        kwargs.insert("chip_x".to_string(), json!(0));
        kwargs.insert("chip_y".to_string(), json!(0));
        let cmd = command("where_is", vec![], kwargs);
        let result = dispatch(&ctx, &cmd, b"{}").await.unwrap();
        assert_eq!(result["job_id"], json!(id));
    }

    #[tokio::test]
    async fn destroy_job_on_missing_job_is_not_found() {
        let ctx = ctx();
        let cmd = command("destroy_job", vec![json!(999)], HashMap::new());
        let err = dispatch(&ctx, &cmd, b"{}").await.unwrap_err();
        assert_eq!(err.code, spalloc_error::Code::NotFound);
    }

    #[tokio::test]
    async fn get_job_machine_info_before_allocation_reports_not_found() {
        let ctx = ctx();
        let id = ctx
            .facade
            .create_job(
                "alice",
                None,
                JobDescriptor::NumBoards {
                    num_boards: 999,
                    max_dead_boards: None,
                },
                MachineSelector::default(),
                StdDuration::from_secs(60),
                None,
            )
            .await
            .unwrap()
            .unwrap();
        let cmd = command("get_job_machine_info", vec![json!(id)], HashMap::new());
        let err = dispatch(&ctx, &cmd, b"{}").await.unwrap_err();
        assert_eq!(err.code, spalloc_error::Code::NotFound);
    }

    #[tokio::test]
    async fn unknown_command_reports_its_name() {
        let ctx = ctx();
        let cmd = command("teleport", vec![], HashMap::new());
        let err = dispatch(&ctx, &cmd, b"{}").await.unwrap_err();
        assert!(err.as_exception_text().contains("teleport"));
    }
}
