//! Band levels from an external analyser, one line per update.
//!
//! Two line formats are understood:
//! - JSON: `{"bass":50,"mid":30,"high":20}`
//! - text: `Bass: 50 | Mid: 30 | High: 20`

use serde::Deserialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::task::JoinHandle;

use crate::models::audio::AudioLevels;

#[derive(Deserialize)]
struct JsonLevels {
    bass: f64,
    mid: f64,
    high: f64,
}

pub fn parse_audio_line(line: &str) -> Option<AudioLevels> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    if line.starts_with('{') {
        let levels: JsonLevels = serde_json::from_str(line).ok()?;
        return Some(AudioLevels::new(levels.bass, levels.mid, levels.high));
    }
    parse_text_line(line)
}

fn parse_text_line(line: &str) -> Option<AudioLevels> {
    let mut bass = None;
    let mut mid = None;
    let mut high = None;

    for part in line.split('|') {
        let (label, value) = part.split_once(':')?;
        let value: f64 = value.trim().parse().ok()?;
        match label.trim().to_lowercase().as_str() {
            "bass" => bass = Some(value),
            "mid" => mid = Some(value),
            "high" => high = Some(value),
            _ => return None,
        }
    }

    Some(AudioLevels::new(bass?, mid?, high?))
}

/// Read lines until EOF, handing every parsed update to `on_levels`.
pub fn spawn_audio_reader<R>(
    reader: R,
    on_levels: impl Fn(AudioLevels) + Send + 'static,
) -> JoinHandle<()>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = reader.lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => match parse_audio_line(&line) {
                    Some(levels) => on_levels(levels),
                    None => log::debug!("[AudioIn] ignored line: {}", line),
                },
                Ok(None) => break,
                Err(e) => {
                    log::error!("[AudioIn] read failed: {}", e);
                    break;
                }
            }
        }
        log::info!("[AudioIn] reader stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn parses_json() {
        let levels = parse_audio_line(r#"{"bass":50,"mid":30.5,"high":20}"#).unwrap();
        assert_eq!(levels, AudioLevels::new(50.0, 30.5, 20.0));
    }

    #[test]
    fn parses_text() {
        let levels = parse_audio_line("Bass: 50 | Mid: 30 | High: 20\r").unwrap();
        assert_eq!(levels, AudioLevels::new(50.0, 30.0, 20.0));
        assert!(parse_audio_line("bass:1|mid:2|HIGH:3").is_some());
    }

    #[test]
    fn values_are_clamped() {
        let levels = parse_audio_line(r#"{"bass":150,"mid":-4,"high":20}"#).unwrap();
        assert_eq!(levels.bass, 100.0);
        assert_eq!(levels.mid, 0.0);
    }

    #[test]
    fn rejects_other_lines() {
        assert_eq!(parse_audio_line(""), None);
        assert_eq!(parse_audio_line("booting analyser v2"), None);
        assert_eq!(parse_audio_line("Bass: 50 | Mid: 30"), None);
        assert_eq!(parse_audio_line(r#"{"bass":50}"#), None);
        assert_eq!(parse_audio_line("Bass: x | Mid: 1 | High: 2"), None);
    }

    #[tokio::test]
    async fn reader_forwards_parsed_lines() {
        let input: &'static [u8] =
            b"hello\nBass: 10 | Mid: 20 | High: 30\n{\"bass\":1,\"mid\":2,\"high\":3}\n";
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        spawn_audio_reader(tokio::io::BufReader::new(input), move |levels| {
            sink.lock().unwrap().push(levels);
        })
        .await
        .unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].bass, 10.0);
        assert_eq!(seen[1].high, 3.0);
    }
}
