//! Human-readable renderings of a transcript (plain text and SRT).

use std::fmt::Write;

use chrono::{DateTime, Utc};

use crate::domain::{Segment, TransformResult, WorkItem};

const RULE_WIDTH: usize = 80;

/// `[MM:SS]` timestamp for transcript lines
pub fn clock(seconds: f64) -> String {
    let total = seconds.max(0.0) as u64;
    format!("[{:02}:{:02}]", total / 60, total % 60)
}

/// SRT timestamp (`HH:MM:SS,mmm`)
pub fn srt_timestamp(seconds: f64) -> String {
    let total_ms = (seconds.max(0.0) * 1000.0).round() as u64;
    let hours = total_ms / 3_600_000;
    let minutes = (total_ms % 3_600_000) / 60_000;
    let secs = (total_ms % 60_000) / 1000;
    let millis = total_ms % 1000;
    format!("{:02}:{:02}:{:02},{:03}", hours, minutes, secs, millis)
}

/// One line per segment: `[MM:SS] Speaker X: text`
pub fn transcript_lines(segments: &[Segment], include_speakers: bool) -> String {
    segments
        .iter()
        .filter_map(|segment| {
            let text = segment.text.trim();
            if text.is_empty() {
                return None;
            }

            let mut line = clock(segment.start);
            if include_speakers {
                if let Some(speaker) = &segment.speaker {
                    let _ = write!(line, " Speaker {}:", speaker);
                }
            }
            line.push(' ');
            line.push_str(text);
            Some(line)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Full `transcript.txt`: report header followed by the timestamped transcript
pub fn transcript_text(item: &WorkItem, result: &TransformResult, at: DateTime<Utc>) -> String {
    let heavy = "=".repeat(RULE_WIDTH);
    let light = "-".repeat(RULE_WIDTH);

    let mut out = String::new();
    let _ = writeln!(out, "{}", heavy);
    let _ = writeln!(out, "TRANSCRIPTION REPORT");
    let _ = writeln!(out, "{}\n", heavy);

    let _ = writeln!(out, "Title: {}", item.title);
    let _ = writeln!(out, "URL: {}", item.source_url);
    let _ = writeln!(out, "Collection: {}", item.collection_label());
    let _ = writeln!(out, "Duration: {}", item.duration_label());
    let _ = writeln!(out, "Language: {}", result.language);
    let _ = writeln!(out, "Transcribed: {}", at.format("%Y-%m-%d %H:%M:%S"));
    let _ = writeln!(out, "Provider: {} ({})", result.provider, result.model);
    if result.speakers.is_present() {
        let _ = writeln!(out, "Speakers: {}", result.speakers.speaker_count());
    }

    let _ = writeln!(out, "\n{}", light);
    let _ = writeln!(out, "TRANSCRIPT");
    let _ = writeln!(out, "{}\n", light);

    out.push_str(&transcript_lines(&result.segments, result.speakers.is_present()));
    out.push('\n');
    out
}

/// `subtitles.srt` contents
pub fn srt(segments: &[Segment]) -> String {
    let mut out = String::new();
    let mut index = 0;

    for segment in segments {
        let text = segment.text.trim();
        if text.is_empty() {
            continue;
        }
        index += 1;

        let _ = writeln!(out, "{}", index);
        let _ = writeln!(
            out,
            "{} --> {}",
            srt_timestamp(segment.start),
            srt_timestamp(segment.end)
        );
        match &segment.speaker {
            Some(speaker) => {
                let _ = writeln!(out, "[{}] {}\n", speaker, text);
            }
            None => {
                let _ = writeln!(out, "{}\n", text);
            }
        }
    }

    out
}
