use std::time::Duration;

use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use reel_engine::{
    DownloadRequest, Engine, EngineConfig, HttpConfig, JobEvent, NotificationPhase, ProxyConfig,
    Request, Response, StreamKind,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use url::Url;

use crate::cli::Args;
use crate::config::AppConfig;
use crate::error::{AppError, Result};
use crate::output::OutputManager;
use crate::utils::parse_headers;

/// Engine configuration from the config file with command-line flags on top.
pub fn engine_config(config: &AppConfig, args: &Args) -> Result<EngineConfig> {
    let mut http = HttpConfig::default();
    if let Some(user_agent) = &config.user_agent {
        http.user_agent = user_agent.clone();
    }
    http.headers = config
        .headers
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    http.headers.extend(parse_headers(&args.headers)?);

    if let Some(secs) = args.timeout.or(config.request_timeout_secs) {
        if secs == 0 {
            return Err(AppError::InvalidInput("timeout must be positive".into()));
        }
        http.request_timeout = Duration::from_secs(secs);
    }
    if let Some(secs) = config.connect_timeout_secs {
        http.connect_timeout = Duration::from_secs(secs);
    }
    if let Some(retries) = config.segment_retries {
        http.segment_retries = retries;
    }
    http.danger_accept_invalid_certs = args.insecure;

    http.proxy = match (&args.proxy, &config.proxy) {
        (Some(url), _) => {
            let proxy = ProxyConfig::new(url, args.proxy_type.unwrap_or_default());
            Some(match (&args.proxy_username, &args.proxy_password) {
                (Some(user), password) => {
                    proxy.with_auth(user, password.clone().unwrap_or_default())
                }
                (None, _) => proxy,
            })
        }
        (None, Some(table)) => {
            let proxy = ProxyConfig::new(&table.url, args.proxy_type.unwrap_or(table.proxy_type));
            Some(match &table.username {
                Some(user) => proxy.with_auth(user, table.password.clone().unwrap_or_default()),
                None => proxy,
            })
        }
        (None, None) => None,
    };

    let mut engine = EngineConfig::default().with_http(http);
    if let Some(jobs) = config.max_concurrent_jobs {
        engine = engine.with_max_concurrent_jobs(jobs);
    }
    if let Some(hops) = config.max_manifest_hops {
        engine = engine.with_max_manifest_hops(hops);
    }
    if let Some(path) = args.ffmpeg.as_ref().or(config.ffmpeg_path.as_ref()) {
        engine = engine.with_ffmpeg_path(path.clone());
    }
    engine.validate()?;
    Ok(engine)
}

/// Token cancelled on the first Ctrl-C.
fn ctrl_c_token() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            trigger.cancel();
        }
    });
    token
}

pub async fn list_variants(
    engine: &Engine,
    output: &OutputManager,
    url: Url,
    referrer: Option<Url>,
    stream: Option<StreamKind>,
) -> Result<()> {
    let request = match stream.or_else(|| StreamKind::detect(&url)) {
        Some(StreamKind::Hls) => Request::ListHlsVariants {
            manifest_url: url,
            referrer,
        },
        Some(StreamKind::Dash) => Request::ListDashVariants {
            mpd_url: url,
            referrer,
        },
        Some(StreamKind::Direct) => {
            return Err(AppError::InvalidInput(format!(
                "{url} is a direct media file and has no variants"
            )));
        }
        None => {
            return Err(AppError::InvalidInput(format!(
                "cannot tell whether {url} is HLS or DASH; pass --stream"
            )));
        }
    };

    let token = ctrl_c_token();
    let response = engine.handle(request, &token).await?;
    print!("{}", output.format_response(&response)?);
    Ok(())
}

fn progress_bar(output: &OutputManager) -> ProgressBar {
    if output.is_json() {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(1000);
    let style = ProgressStyle::with_template("{spinner} {msg:<12} [{bar:40}] {percent:>3}%")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ");
    bar.set_style(style);
    bar.enable_steady_tick(Duration::from_millis(120));
    bar
}

/// Starts a download job and follows it to its terminal event.
pub async fn download(engine: &Engine, output: &OutputManager, request: DownloadRequest) -> Result<()> {
    let token = CancellationToken::new();
    let job_id = match engine
        .handle(Request::StartDownload(request), &token)
        .await?
    {
        Response::JobStarted { job_id } => job_id,
        other => {
            return Err(AppError::InvalidInput(format!(
                "unexpected response {other:?}"
            )));
        }
    };
    info!("Started job {job_id}");

    let interrupt = ctrl_c_token();
    let mut events = Box::pin(engine.controller().subscribe_job(job_id));
    let bar = progress_bar(output);
    let mut last: Option<JobEvent> = None;
    let mut cancel_sent = false;

    loop {
        tokio::select! {
            event = events.next() => {
                let Some(event) = event else { break };
                if output.is_json() {
                    println!("{}", output.format_event(&event)?);
                }
                match event.phase {
                    NotificationPhase::Download => bar.set_message("downloading"),
                    NotificationPhase::Convert => bar.set_message("converting"),
                    _ => {}
                }
                bar.set_position((event.progress * 1000.0).round() as u64);
                let terminal = event.phase.is_terminal();
                last = Some(event);
                if terminal {
                    break;
                }
            }
            _ = interrupt.cancelled(), if !cancel_sent => {
                warn!("Interrupted, canceling job {job_id}");
                cancel_sent = true;
                engine.handle(Request::CancelJob { job_id }, &token).await?;
            }
        }
    }
    bar.finish_and_clear();

    match last {
        Some(JobEvent {
            phase: NotificationPhase::Done,
            message,
            ..
        }) => {
            if !output.is_json() {
                println!("Saved {}", message.unwrap_or_default());
            }
            Ok(())
        }
        Some(JobEvent {
            phase: NotificationPhase::Canceled,
            ..
        }) => Err(AppError::Canceled),
        Some(JobEvent {
            phase: NotificationPhase::Error,
            message,
            ..
        }) => Err(AppError::JobFailed(message.unwrap_or_default())),
        _ => Err(AppError::JobFailed(
            "job ended without a final status".into(),
        )),
    }
}
