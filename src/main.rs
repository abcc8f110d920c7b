use std::{path::PathBuf, process, sync::Arc};

use pressroom::{
    application::{
        error::AppError,
        pool::{PoolConfig, RendererPool},
        render::RenderPipeline,
    },
    config::{self, ConvertArgs, Settings},
    domain::print::{Margins, PrintOptions},
    infra::{
        artifacts::ArtifactStore,
        chrome::{ChromeOptions, ChromeRendererFactory},
        error::InfraError,
        http::{self, HttpState},
        telemetry,
    },
};
use tokio::task::JoinHandle;
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt()
        .with_max_level(Level::ERROR)
        .with_writer(std::io::stderr)
        .finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Convert(args) => run_convert(settings, *args).await,
    }
}

async fn start_pool(settings: &Settings, config: PoolConfig) -> Result<RendererPool, AppError> {
    let factory = Arc::new(ChromeRendererFactory::new(ChromeOptions::from(
        &settings.render,
    )));
    Ok(RendererPool::start(factory, config).await?)
}

fn open_artifacts(settings: &Settings) -> Result<ArtifactStore, AppError> {
    ArtifactStore::new(&settings.artifacts.directory, settings.artifacts.shard)
        .map_err(|err| AppError::from(InfraError::from(err)))
}

async fn run_serve(settings: Settings) -> Result<(), AppError> {
    let artifacts = Arc::new(open_artifacts(&settings)?);
    let pool = start_pool(&settings, settings.pool_config()).await?;
    let pipeline = RenderPipeline::new(pool.clone(), settings.render_deadlines());

    let reaper = spawn_reaper(pool.clone(), &settings);

    let state = HttpState {
        pipeline,
        artifacts,
        public_base_url: settings.server.public_base_url.clone(),
        max_request_bytes: usize::try_from(settings.http.max_request_bytes.get())
            .unwrap_or(usize::MAX),
    };
    let result = serve_http(&settings, state).await;

    reaper.abort();
    let _ = reaper.await;
    pool.shutdown().await;

    result
}

/// Periodically retire idle renderers beyond the pool minimum.
fn spawn_reaper(pool: RendererPool, settings: &Settings) -> JoinHandle<()> {
    let period = settings.pool.reap_interval;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.tick().await; // first tick fires immediately
        loop {
            interval.tick().await;
            let retired = pool.shrink_idle().await;
            if retired > 0 {
                info!(
                    target = "pressroom::reaper",
                    retired,
                    population = pool.stats().population(),
                    min = pool.config().min,
                    "Retired idle renderers"
                );
            }
        }
    })
}

async fn serve_http(settings: &Settings, state: HttpState) -> Result<(), AppError> {
    let router = http::build_router(state);

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    info!(
        target = "pressroom::serve",
        addr = %settings.server.addr,
        "Listening for conversions"
    );

    let grace = settings.server.graceful_shutdown;
    let (stopped_tx, stopped_rx) = tokio::sync::oneshot::channel::<()>();
    let server = axum::serve(listener, router.into_make_service()).with_graceful_shutdown(
        async move {
            shutdown_signal().await;
            let _ = stopped_tx.send(());
        },
    );

    let mut server = tokio::spawn(async move { server.await });

    tokio::select! {
        joined = &mut server => {
            return joined
                .map_err(|err| AppError::unexpected(format!("server task failed: {err}")))?
                .map_err(|err| AppError::unexpected(format!("server error: {err}")));
        }
        _ = stopped_rx => {}
    }

    match tokio::time::timeout(grace, &mut server).await {
        Ok(joined) => joined
            .map_err(|err| AppError::unexpected(format!("server task failed: {err}")))?
            .map_err(|err| AppError::unexpected(format!("server error: {err}"))),
        Err(_) => {
            warn!(
                target = "pressroom::serve",
                grace_secs = grace.as_secs(),
                "In-flight requests outlived the shutdown grace period"
            );
            server.abort();
            Ok(())
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(target = "pressroom::serve", error = %err, "Ctrl-C handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(target = "pressroom::serve", error = %err, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!(target = "pressroom::serve", "Shutdown signal received");
}

async fn run_convert(settings: Settings, args: ConvertArgs) -> Result<(), AppError> {
    let html = tokio::fs::read_to_string(&args.input)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    let options = PrintOptions {
        page_format: args.format,
        landscape: args.landscape,
        margins: args.margin.map(Margins::uniform).unwrap_or_default(),
        ..PrintOptions::default()
    };

    let single = PoolConfig {
        min: 1,
        max: 1,
        ..settings.pool_config()
    };
    let pool = start_pool(&settings, single).await?;
    let pipeline = RenderPipeline::new(pool.clone(), settings.render_deadlines());

    let rendered = pipeline.render(&html, &options).await;
    pool.shutdown().await;
    let pdf = rendered?;

    if args.store {
        let artifacts = open_artifacts(&settings)?;
        let id = artifacts.store(pdf).await?;
        println!("{id}");
        return Ok(());
    }

    let output = args.output.unwrap_or_else(|| default_output(&args.input));
    tokio::fs::write(&output, &pdf)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    info!(
        target = "pressroom::convert",
        input = %args.input.display(),
        output = %output.display(),
        pdf_bytes = pdf.len(),
        "PDF written"
    );
    Ok(())
}

fn default_output(input: &std::path::Path) -> PathBuf {
    input.with_extension("pdf")
}
