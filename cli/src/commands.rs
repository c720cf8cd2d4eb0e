//! Subcommand implementations over the management client

use serde_json::json;

use runtime_engine::adapters::management::{ManagementClient, Request, Response};
use runtime_engine::domain::DomainError;

use crate::formatters;
use crate::options::{take_flag, CliOptions};

/// Exit codes: 0 success, 1 failure, 2 usage error.
pub async fn run(options: CliOptions) -> i32 {
    let mut rest = options.rest.clone();
    let result = match options.command.as_str() {
        "ps" => simple(&options, Request::new("ps"), |r, json| {
            if json {
                formatters::print_json(r);
            } else {
                formatters::print_workers(r);
            }
        })
        .await,
        "applications" => simple(&options, Request::new("applications"), |r, json| {
            if json {
                formatters::print_json(r);
            } else {
                formatters::print_applications(r);
            }
        })
        .await,
        "config" => simple(&options, Request::new("config"), |r, _| {
            formatters::print_json(r)
        })
        .await,
        "env" => match rest.first() {
            Some(target) => {
                simple(
                    &options,
                    Request::new("env").target(target.clone()),
                    |r, _| formatters::print_json(r),
                )
                .await
            }
            None => return usage("env <application>"),
        },
        "metrics" => match rest.first() {
            Some(target) => {
                let target = target.clone();
                simple(
                    &options,
                    Request::new("metrics").target(target),
                    |r, json| {
                        if json {
                            formatters::print_json(r);
                        } else {
                            formatters::print_metrics(r);
                        }
                    },
                )
                .await
            }
            None => return usage("metrics <application>"),
        },
        "inject" => match inject_request(&mut rest) {
            Ok(request) => simple(&options, request, |r, _| formatters::print_json(r)).await,
            Err(message) => return usage(&message),
        },
        "start" | "stop" | "restart" | "reload" => {
            let mut request = Request::new(options.command.clone());
            if let Some(target) = rest.first() {
                request = request.target(target.clone());
            }
            simple(&options, request, |r, _| formatters::print_json(r)).await
        }
        "pprof" => match (rest.first().map(String::as_str), rest.get(1)) {
            (Some(action @ ("start" | "stop")), Some(target)) => {
                let request = Request::new("pprof")
                    .target(target.clone())
                    .args(json!({ "action": action }));
                simple(&options, request, |r, _| formatters::print_json(r)).await
            }
            _ => return usage("pprof <start|stop> <application>"),
        },
        "logs" => logs(&options, &mut rest).await,
        other => {
            eprintln!("unknown command: {other}");
            return 2;
        }
    };

    match result {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("{err}");
            1
        }
    }
}

fn usage(message: &str) -> i32 {
    eprintln!("usage: apprt {message}");
    2
}

async fn connect(options: &CliOptions) -> Result<ManagementClient, DomainError> {
    ManagementClient::discover(&options.runtime_dir, options.selector.as_deref()).await
}

fn unwrap_response(response: Response) -> Result<serde_json::Value, DomainError> {
    if response.is_ok() {
        Ok(response.result.unwrap_or(serde_json::Value::Null))
    } else {
        let error = response
            .error
            .map(|e| e.message)
            .unwrap_or_else(|| "unknown error".to_string());
        Err(DomainError::Transport(error))
    }
}

/// One-shot request, rendered by `print`.
async fn simple(
    options: &CliOptions,
    request: Request,
    print: impl FnOnce(&serde_json::Value, bool),
) -> Result<(), DomainError> {
    let mut client = connect(options).await?;
    let response = client.call(&request).await?;
    let result = unwrap_response(response)?;
    print(&result, options.json);
    Ok(())
}

fn inject_request(rest: &mut Vec<String>) -> Result<Request, String> {
    let method = take_flag(rest, "--method")?;
    let path = take_flag(rest, "--path")?;
    let body = take_flag(rest, "--body")?;
    let target = rest
        .first()
        .cloned()
        .ok_or_else(|| "inject <application> [--method M] [--path P] [--body B]".to_string())?;

    let mut args = serde_json::Map::new();
    if let Some(method) = method {
        args.insert("method".to_string(), json!(method));
    }
    if let Some(path) = path {
        args.insert("path".to_string(), json!(path));
    }
    if let Some(body) = body {
        args.insert("body".to_string(), json!(body));
    }
    Ok(Request::new("inject")
        .target(target)
        .args(serde_json::Value::Object(args)))
}

/// Stream log records until the daemon goes away or the user interrupts.
async fn logs(options: &CliOptions, rest: &mut Vec<String>) -> Result<(), DomainError> {
    let level = take_flag(rest, "--level").map_err(DomainError::InvalidRequest)?;
    let mut request = Request::new("logs");
    if let Some(target) = rest.first() {
        request = request.target(target.clone());
    }
    if let Some(level) = level {
        request = request.args(json!({ "level": level }));
    }

    let mut client = connect(options).await?;
    client.send(&request).await?;

    // First frame acknowledges the stream.
    match client.next_frame().await? {
        Some(ack) if ack.is_ok() => {}
        Some(ack) => {
            unwrap_response(ack)?;
        }
        None => return Err(DomainError::Transport("connection closed".to_string())),
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => return Ok(()),
            frame = client.next_frame() => match frame? {
                Some(frame) => {
                    let record = unwrap_response(frame)?;
                    if options.json {
                        println!("{record}");
                    } else {
                        formatters::print_log_record(&record);
                    }
                }
                None => return Ok(()),
            },
        }
    }
}
