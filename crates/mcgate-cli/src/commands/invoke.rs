//! `mcgate invoke`: run one trigger's handler chain against an object.

use std::fs::File;
use std::os::fd::OwnedFd;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use clap::Args;
use http::{HeaderMap, HeaderName, HeaderValue};
use mcgate_host::{DockerRuntime, Gateway, Invocation, ObjectContext, TriggerOutcome};
use mcgate_store::{HttpObjectStore, Trigger};
use serde_json::json;

use crate::opts::GlobalOpts;
use crate::output::print_success;

const STORE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Args, Debug)]
pub struct InvokeArgs {
    #[arg(long)]
    pub account: String,

    #[arg(long)]
    pub container: String,

    #[arg(long)]
    pub object: String,

    /// Local data file of the object
    #[arg(long)]
    pub data: PathBuf,

    #[arg(long, default_value = "onget")]
    pub trigger: Trigger,

    /// Request header as `Name: value`; repeatable
    #[arg(long = "header", value_name = "NAME:VALUE")]
    pub headers: Vec<String>,

    /// Input handed to the handlers (defaults to the data file)
    #[arg(long)]
    pub input: Option<PathBuf>,
}

pub async fn cmd_invoke(opts: &GlobalOpts, args: &InvokeArgs) -> Result<()> {
    let endpoint = opts
        .store_url
        .as_deref()
        .ok_or_else(|| anyhow!("--store-url (or MCGATE_STORE_URL) is required"))?;
    let store = Arc::new(HttpObjectStore::new(endpoint, opts.token.clone(), STORE_TIMEOUT)?);
    let runtime = Arc::new(DockerRuntime::connect().context("connect to container runtime")?);
    let gateway = Gateway::new(opts.gateway_config(), store, runtime);

    let input_path = args.input.as_ref().unwrap_or(&args.data);
    let input = File::open(input_path).with_context(|| format!("open {}", input_path.display()))?;
    let invocation = Invocation {
        request_headers: parse_headers(&args.headers)?,
        object_headers: Default::default(),
        input: Some(OwnedFd::from(input)),
    };
    let object = ObjectContext {
        account: &args.account,
        container: &args.container,
        object: &args.object,
        data_file: &args.data,
    };

    let data = match gateway.run_trigger(object, args.trigger, invocation).await? {
        TriggerOutcome::Skipped => json!({ "trigger": args.trigger.as_str(), "skipped": true }),
        TriggerOutcome::Completed { task_id, result } => json!({
            "trigger": args.trigger.as_str(),
            "task_id": task_id,
            "result": result,
        }),
    };
    print_success(opts, data)
}

fn parse_headers(raw: &[String]) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    for entry in raw {
        let (name, value) = entry
            .split_once(':')
            .ok_or_else(|| anyhow!("header '{entry}' is not NAME:VALUE"))?;
        let name = HeaderName::from_bytes(name.trim().as_bytes())
            .with_context(|| format!("header name in '{entry}'"))?;
        let value = HeaderValue::from_str(value.trim())
            .with_context(|| format!("header value in '{entry}'"))?;
        headers.append(name, value);
    }
    Ok(headers)
}
