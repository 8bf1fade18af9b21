//! `mcgate trigger` commands: edit an object's trigger record in place.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use mcgate_host::{DeleteTarget, TriggerAction, apply_trigger_action};
use mcgate_store::{HandlerList, Trigger, TriggerMap, read_triggers};
use serde_json::json;

use crate::opts::GlobalOpts;
use crate::output::print_success;

#[derive(Args, Debug)]
pub struct TriggerShowArgs {
    /// Object data file
    #[arg(long)]
    pub data: PathBuf,
}

#[derive(Args, Debug)]
pub struct TriggerSetArgs {
    /// Object data file
    #[arg(long)]
    pub data: PathBuf,

    /// onget | onput | ondelete | ontimer
    #[arg(long)]
    pub trigger: Trigger,

    /// Comma-separated handler names, in execution order
    #[arg(long)]
    pub handlers: String,

    /// File whose contents become each handler's metadata
    #[arg(long)]
    pub body: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct TriggerDeleteArgs {
    /// Object data file
    #[arg(long)]
    pub data: PathBuf,

    /// Trigger to edit; without it every trigger is cleared
    #[arg(long)]
    pub trigger: Option<Trigger>,

    /// Handlers to remove from the trigger; without it the trigger is cleared
    #[arg(long, requires = "trigger")]
    pub handlers: Option<String>,
}

pub fn cmd_show(opts: &GlobalOpts, args: &TriggerShowArgs) -> Result<()> {
    let map = read_triggers(&args.data)
        .with_context(|| format!("read triggers for {}", args.data.display()))?;
    let exists = map.is_some();
    print_success(
        opts,
        json!({
            "data_file": args.data,
            "exists": exists,
            "triggers": map.unwrap_or_default(),
        }),
    )
}

pub fn cmd_set(opts: &GlobalOpts, args: &TriggerSetArgs) -> Result<()> {
    let body = match &args.body {
        Some(path) => std::fs::read(path).with_context(|| format!("read {}", path.display()))?,
        None => Vec::new(),
    };
    let handlers = HandlerList::parse(&args.handlers);
    anyhow::ensure!(!handlers.is_empty(), "--handlers names no handlers");
    let action = TriggerAction::Assign {
        trigger: args.trigger,
        handlers,
    };
    let map = apply_trigger_action(&args.data, &action, &body)?;
    print_updated(opts, args, map)
}

pub fn cmd_delete(opts: &GlobalOpts, args: &TriggerDeleteArgs) -> Result<()> {
    let target = match args.trigger {
        Some(trigger) => DeleteTarget::Trigger {
            trigger,
            handlers: args
                .handlers
                .as_deref()
                .map(HandlerList::parse)
                .unwrap_or_default(),
        },
        None => DeleteTarget::All,
    };
    let map = apply_trigger_action(&args.data, &TriggerAction::Delete(target), &[])?;
    print_success(opts, json!({ "data_file": args.data, "triggers": map }))
}

fn print_updated(opts: &GlobalOpts, args: &TriggerSetArgs, map: TriggerMap) -> Result<()> {
    print_success(
        opts,
        json!({
            "data_file": args.data,
            "trigger": args.trigger.as_str(),
            "triggers": map,
        }),
    )
}
