mod api;
mod command;
mod config;
mod error;
mod error_log;
mod nav;
mod query;
mod transform;
mod tui;
mod view;

use std::sync::Arc;

use anyhow::anyhow;
use clap::Parser;
use tokio::sync::mpsc;
use tokio::task;

use crate::api::ApiClient;
use crate::command::Command;
use crate::error_log::ErrorLogStore;
use crate::query::QueryCache;
use crate::tui::TuiApp;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let param = config::CliParams::parse();
    let client = ApiClient::new(&param.api_base)?;

    let (tx, mut rx) = mpsc::unbounded_channel::<Command>();
    let probe = client.clone();
    let probe_tx = tx.clone();
    task::spawn(async move {
        let command = match probe.check_health().await {
            Ok(report) => Command::Status(format!(
                "{} is {}{}",
                probe.base(),
                report.status,
                report
                    .timestamp
                    .map(|ts| format!(" ({ts})"))
                    .unwrap_or_default()
            )),
            Err(err) => Command::Error(format!("health check against {} failed: {err}", probe.base())),
        };
        let _ = probe_tx.send(command);
    });

    let cache = QueryCache::new(Arc::new(client.clone()), param.refetch_policy(), tx.clone());
    let error_log = ErrorLogStore::new(param.error_log.clone());
    let mut app = TuiApp::new(cache, error_log, client.base(), param.redraw_gap());
    let app_result = tokio::select! {
        result = app.run(&mut rx) => result,
        _ = tokio::signal::ctrl_c() => Ok(()),
    };
    app.dispose();
    app_result.map_err(|err| anyhow!(err.to_string()))?;
    Ok(())
}
