/// Collapse whitespace runs to `_` and drop non-printable bytes so every
/// field stays one `key=value` token.
fn sanitize_value(value: &str) -> String {
    let joined = value
        .split_ascii_whitespace()
        .map(|word| word.chars().filter(char::is_ascii_graphic).collect::<String>())
        .filter(|word| !word.is_empty())
        .collect::<Vec<_>>()
        .join("_");
    match joined.trim_matches('_') {
        "" => "na".to_string(),
        trimmed => trimmed.to_string(),
    }
}

/// A recoverable anomaly, printed as one greppable `CWM_WARN` line.
#[derive(Debug, Clone, Copy)]
pub struct WarnEvent<'a> {
    pub code: &'a str,
    pub stage: &'a str,
    pub action: &'a str,
    pub bank: &'a str,
    pub source: &'a str,
    pub reason: &'a str,
    pub err: &'a str,
}

pub fn format_line(event: &WarnEvent<'_>) -> String {
    format!(
        "CWM_WARN code={} stage={} action={} bank={} source={} reason={} err={}",
        sanitize_value(event.code),
        sanitize_value(event.stage),
        sanitize_value(event.action),
        sanitize_value(event.bank),
        sanitize_value(event.source),
        sanitize_value(event.reason),
        sanitize_value(event.err),
    )
}

pub fn emit(event: WarnEvent<'_>) {
    tracing::debug!(code = event.code, stage = event.stage, "emitting warning");
    eprintln!("{}", format_line(&event));
}
