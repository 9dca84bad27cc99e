use harness_exec::cli::LogLevel;
use harness_exec::logging::build_filter;

#[test]
fn cli_level_overrides_environment() {
    let filter = build_filter(Some(LogLevel::Debug), Some("harness_exec=trace"));
    assert_eq!(filter.to_string(), "debug");
}

#[test]
fn environment_accepts_filter_directives() {
    let filter = build_filter(None, Some("harness_exec::exec=trace"));
    assert_eq!(filter.to_string(), "harness_exec::exec=trace");
}

#[test]
fn missing_or_invalid_environment_falls_back_to_info() {
    assert_eq!(build_filter(None, None).to_string(), "info");
    assert_eq!(
        build_filter(None, Some("harness_exec=loudest")).to_string(),
        "info"
    );
}
