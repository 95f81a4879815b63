//! FFmpeg progress parsing.

/// Progress information from FFmpeg's `-progress` output.
#[derive(Debug, Clone, Default)]
pub struct FfmpegProgress {
    /// Current frame number
    pub frame: u64,
    /// Output time in milliseconds
    pub out_time_ms: i64,
    /// Encoding speed (e.g., 1.5 = 1.5x realtime)
    pub speed: f64,
    /// Whether encoding is complete
    pub is_complete: bool,
}

impl FfmpegProgress {
    /// Whole percent of `total_duration_ms` written so far, capped at 100.
    pub fn percent(&self, total_duration_ms: i64) -> u8 {
        if total_duration_ms <= 0 || self.out_time_ms <= 0 {
            return 0;
        }
        let pct = (self.out_time_ms as f64 / total_duration_ms as f64) * 100.0;
        pct.floor().min(100.0) as u8
    }
}

/// Fold one `key=value` line into `current`. Yields a snapshot at the end of
/// each progress block and `Other` for lines that are not progress output.
pub(crate) fn parse_progress_line(line: &str, current: &mut FfmpegProgress) -> ProgressLine {
    let line = line.trim();
    let Some((key, value)) = line.split_once('=') else {
        return ProgressLine::Other;
    };
    if key.is_empty() || key.contains(char::is_whitespace) {
        return ProgressLine::Other;
    }

    match key {
        // Both are microseconds despite the name of the first.
        "out_time_ms" | "out_time_us" => {
            if let Ok(us) = value.parse::<i64>() {
                current.out_time_ms = us / 1000;
            }
        }
        "frame" => {
            if let Ok(frame) = value.parse() {
                current.frame = frame;
            }
        }
        "speed" => {
            if let Some(speed) = value.strip_suffix('x').and_then(|s| s.trim().parse().ok()) {
                current.speed = speed;
            }
        }
        "progress" => {
            current.is_complete = value == "end";
            return ProgressLine::Block(current.clone());
        }
        _ => {}
    }
    ProgressLine::Field
}

#[derive(Debug)]
pub(crate) enum ProgressLine {
    /// End of a progress block.
    Block(FfmpegProgress),
    /// A field inside a block.
    Field,
    /// Diagnostic output.
    Other,
}
