//! Best-effort progress tracking from ffmpeg's stderr.
//!
//! ffmpeg prints the input duration once (`Duration: HH:MM:SS.ms`) and then a
//! statistics line containing `time=HH:MM:SS.ms` as it encodes. The ratio of
//! the two is reported as a percentage. Nothing guarantees the values are
//! monotonic.

/// Parse `HH:MM:SS.ms` into seconds.
pub fn parse_timestamp(value: &str) -> Option<f64> {
    let mut parts = value.trim().split(':');
    let hours: f64 = parts.next()?.parse().ok()?;
    let minutes: f64 = parts.next()?.parse().ok()?;
    let seconds: f64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

/// Extract the input duration from a `Duration: 00:01:02.50, start: ...` line.
pub fn parse_duration_line(line: &str) -> Option<f64> {
    let start = line.find("Duration:")? + "Duration:".len();
    let rest = line[start..].trim_start();
    let end = rest.find(',').unwrap_or(rest.len());
    parse_timestamp(&rest[..end])
}

/// Extract the encoded position from a statistics line.
pub fn parse_time_field(line: &str) -> Option<f64> {
    if !(line.contains("frame=") || line.contains("size=")) {
        return None;
    }
    let start = line.find("time=")? + "time=".len();
    let rest = &line[start..];
    let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
    parse_timestamp(&rest[..end])
}

/// Accumulates stderr lines into a percentage.
#[derive(Debug, Default, Clone)]
pub struct ProgressTracker {
    duration: Option<f64>,
    last_percent: Option<f64>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one stderr line. Returns a new percentage (0..=100) when the line
    /// moved progress by at least one point.
    pub fn observe(&mut self, line: &str) -> Option<f64> {
        if self.duration.is_none() {
            if let Some(duration) = parse_duration_line(line).filter(|d| *d > 0.0) {
                self.duration = Some(duration);
                return None;
            }
        }

        let duration = self.duration?;
        let position = parse_time_field(line)?;
        let percent = (position / duration * 100.0).clamp(0.0, 100.0);

        match self.last_percent {
            Some(last) if (percent - last).abs() < 1.0 => None,
            _ => {
                self.last_percent = Some(percent);
                Some(percent)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps() {
        assert_eq!(parse_timestamp("00:00:10.50"), Some(10.5));
        assert_eq!(parse_timestamp("01:30:00.00"), Some(5400.0));
        assert_eq!(parse_timestamp("N/A"), None);
        assert_eq!(parse_timestamp("1:2:3:4"), None);
    }

    #[test]
    fn duration_line() {
        let line = "  Duration: 00:01:40.00, start: 0.000000, bitrate: 1205 kb/s";
        assert_eq!(parse_duration_line(line), Some(100.0));
        assert_eq!(parse_duration_line("Stream #0:0: Video: h264"), None);
    }

    #[test]
    fn stats_line() {
        let line = "frame=  250 fps=50 q=28.0 size=    1024kB time=00:00:10.00 bitrate= 838.9kbits/s speed=2.0x";
        assert_eq!(parse_time_field(line), Some(10.0));
        assert_eq!(parse_time_field("time=00:00:10.00"), None);
    }

    #[test]
    fn tracker_reports_percentages() {
        let mut tracker = ProgressTracker::new();
        assert_eq!(tracker.observe("frame=1 time=00:00:01.00"), None);
        assert_eq!(tracker.observe("Duration: 00:00:20.00, start: 0.0"), None);
        assert_eq!(tracker.observe("frame=10 time=00:00:05.00 bitrate=1k"), Some(25.0));
        // Under one point of movement is suppressed.
        assert_eq!(tracker.observe("frame=11 time=00:00:05.10 bitrate=1k"), None);
        assert_eq!(tracker.observe("frame=99 time=00:00:30.00 bitrate=1k"), Some(100.0));
    }
}
