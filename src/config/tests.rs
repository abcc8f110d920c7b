use std::io::Write;

use serial_test::serial;

use super::*;

#[test]
fn defaults_match_documented_values() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

    assert_eq!(settings.server.addr.port(), DEFAULT_PORT);
    assert!(settings.server.public_base_url.is_none());
    assert_eq!(settings.pool.min, 1);
    assert_eq!(settings.pool.max, 4);
    assert_eq!(settings.pool.acquire_timeout, Duration::from_secs(30));
    assert_eq!(settings.pool.max_lifetime, None);
    assert_eq!(settings.render.load_timeout, Duration::from_secs(60));
    assert_eq!(settings.render.render_timeout, Duration::from_secs(60));
    assert_eq!(settings.render.settle_idle, Duration::from_millis(500));
    assert!(settings.render.sandbox);
    assert_eq!(settings.artifacts.directory, PathBuf::from("pdfs"));
    assert!(!settings.artifacts.shard);
    assert_eq!(
        settings.http.max_request_bytes.get(),
        DEFAULT_MAX_REQUEST_BYTES
    );
}

#[test]
fn cli_overrides_take_highest_precedence() {
    let mut raw = RawSettings::default();
    raw.server.port = Some(4000);
    raw.logging.level = Some("info".to_string());
    raw.pool.max = Some(2);

    let overrides = ServeOverrides {
        server_port: Some(4321),
        pool_max: Some(8),
        engine: EngineOverrides {
            log_level: Some("debug".to_string()),
            ..Default::default()
        },
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.server.addr.port(), 4321);
    assert_eq!(settings.pool.max, 8);
    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
}

#[test]
fn cli_json_logging_enforces_format() {
    let mut raw = RawSettings::default();
    let overrides = ServeOverrides {
        engine: EngineOverrides {
            log_json: Some(true),
            ..Default::default()
        },
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert!(matches!(settings.logging.format, LogFormat::Json));
}

#[test]
fn pool_bounds_are_validated() {
    let mut raw = RawSettings::default();
    raw.pool.min = Some(5);
    raw.pool.max = Some(2);
    let err = Settings::from_raw(raw).expect_err("min above max");
    assert!(matches!(err, LoadError::Invalid { key: "pool.min", .. }));

    let mut raw = RawSettings::default();
    raw.pool.min = Some(0);
    raw.pool.max = Some(0);
    let err = Settings::from_raw(raw).expect_err("zero max");
    assert!(matches!(err, LoadError::Invalid { key: "pool.max", .. }));
}

#[test]
fn zero_acquire_timeout_is_allowed() {
    let mut raw = RawSettings::default();
    raw.pool.acquire_timeout_ms = Some(0);
    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(settings.render_deadlines().acquire, Duration::ZERO);
}

#[test]
fn zero_deadlines_are_rejected() {
    let mut raw = RawSettings::default();
    raw.render.load_timeout_seconds = Some(0);
    let err = Settings::from_raw(raw).expect_err("zero load timeout");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "render.load_timeout_seconds",
            ..
        }
    ));
}

#[test]
fn settle_window_must_fit_inside_load_deadline() {
    let mut raw = RawSettings::default();
    raw.render.load_timeout_seconds = Some(1);
    raw.render.settle_idle_ms = Some(1_000);
    let err = Settings::from_raw(raw).expect_err("settle too long");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "render.settle_idle_ms",
            ..
        }
    ));
}

#[test]
fn public_base_url_must_be_http() {
    let mut raw = RawSettings::default();
    raw.server.public_base_url = Some("ftp://files.example.com".to_string());
    assert!(Settings::from_raw(raw).is_err());

    let mut raw = RawSettings::default();
    raw.server.public_base_url = Some("https://pdf.example.com/".to_string());
    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(
        settings.server.public_base_url.map(String::from).as_deref(),
        Some("https://pdf.example.com/")
    );
}

#[test]
fn pool_config_and_deadlines_follow_settings() {
    let mut raw = RawSettings::default();
    raw.pool.min = Some(2);
    raw.pool.max = Some(3);
    raw.pool.max_lifetime_seconds = Some(3600);
    raw.render.render_timeout_seconds = Some(15);
    let settings = Settings::from_raw(raw).expect("valid settings");

    let pool = settings.pool_config();
    assert_eq!((pool.min, pool.max), (2, 3));
    assert_eq!(pool.max_lifetime, Some(Duration::from_secs(3600)));
    assert_eq!(settings.render_deadlines().render, Duration::from_secs(15));
}

#[test]
fn default_to_serve_command() {
    let args = CliArgs::parse_from(["pressroom"]);
    let command = args
        .command
        .unwrap_or(Command::Serve(Box::<ServeArgs>::default()));
    assert!(matches!(command, Command::Serve(_)));
}

#[test]
fn parse_serve_overrides() {
    let args = CliArgs::parse_from([
        "pressroom",
        "serve",
        "--server-host",
        "0.0.0.0",
        "--pool-max",
        "6",
        "--render-chrome-path",
        "/usr/bin/chromium",
    ]);

    match args.command.expect("serve command") {
        Command::Serve(serve) => {
            assert_eq!(serve.overrides.server_host.as_deref(), Some("0.0.0.0"));
            assert_eq!(serve.overrides.pool_max, Some(6));
            assert_eq!(
                serve.overrides.engine.chrome_path.as_deref(),
                Some(std::path::Path::new("/usr/bin/chromium"))
            );
        }
        _ => panic!("wrong command parsed"),
    }
}

#[test]
fn parse_convert_arguments() {
    let args = CliArgs::parse_from([
        "pressroom",
        "convert",
        "report.html",
        "--output",
        "/tmp/report.pdf",
        "--format",
        "letter",
        "--landscape",
    ]);

    match args.command.expect("convert command") {
        Command::Convert(convert) => {
            assert_eq!(convert.input, std::path::Path::new("report.html"));
            assert_eq!(
                convert.output.as_deref(),
                Some(std::path::Path::new("/tmp/report.pdf"))
            );
            assert_eq!(convert.format, crate::domain::print::PageFormat::Letter);
            assert!(convert.landscape);
            assert!(!convert.store);
        }
        _ => panic!("wrong command parsed"),
    }
}

#[test]
fn convert_rejects_output_together_with_store() {
    let result = CliArgs::try_parse_from([
        "pressroom",
        "convert",
        "report.html",
        "--output",
        "out.pdf",
        "--store",
    ]);
    assert!(result.is_err());
}

#[test]
#[serial]
fn config_file_environment_and_cli_layer_in_order() {
    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("temp config");
    writeln!(
        file,
        "[pool]\nmin = 2\nmax = 3\n\n[artifacts]\ndirectory = \"/srv/pdfs\"\nshard = true\n"
    )
    .expect("write config");

    // SAFETY: serialised with other environment-mutating tests.
    unsafe { std::env::set_var("PRESSROOM__POOL__MAX", "5") };
    let args = CliArgs::parse_from([
        "pressroom",
        "--config-file",
        file.path().to_str().expect("utf8 path"),
        "serve",
        "--pool-min",
        "4",
    ]);
    let result = load(&args);
    unsafe { std::env::remove_var("PRESSROOM__POOL__MAX") };

    let settings = result.expect("valid settings");
    assert_eq!(settings.pool.min, 4, "cli wins over file");
    assert_eq!(settings.pool.max, 5, "environment wins over file");
    assert_eq!(settings.artifacts.directory, PathBuf::from("/srv/pdfs"));
    assert!(settings.artifacts.shard);
}
