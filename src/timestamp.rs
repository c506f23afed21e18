/// Formats a Matroska timestamp in nanoseconds.
pub fn ns_str(ns: u64) -> String {
    let total_ms = ns / 1_000_000;
    let hours = total_ms / 3_600_000;
    let minutes = total_ms % 3_600_000 / 60_000;
    let seconds = total_ms % 60_000 / 1000;
    let milliseconds = total_ms % 1000;

    format!(
        "{hours:0width$}:{minutes:02}:{seconds:02}.{milliseconds:03}",
        width = if hours >= 100 { 0 } else { 2 }
    )
}
