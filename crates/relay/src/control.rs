//! Line-oriented control input.
//!
//! Grammar: `play <url> [start] [duration]`, `play`/`resume`, `pause`, `skip`, `clear`.
//! After the URL, offsets may also be given by name in any order: `start=`/`begin=`,
//! `dur=`/`duration=` and `end=`. An end offset takes precedence over a duration.

use std::time::Duration;

use relay_types::{PlaybackCommand, TrackRequest};

use crate::timespec::parse_timespec;

const PLAY_USAGE: &str = "usage: play <url> [start] [duration | end=<time>]";

#[derive(Debug, PartialEq, Eq)]
pub enum Control {
    Enqueue(TrackRequest),
    Command(PlaybackCommand),
}

/// Parse one input line. Blank lines and `#` comments yield `Ok(None)`.
pub fn parse_line(line: &str) -> Result<Option<Control>, String> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    let mut words = line.split_whitespace();
    let verb = words.next().unwrap_or_default();
    let args: Vec<&str> = words.collect();

    if verb.eq_ignore_ascii_case("play") && !args.is_empty() {
        return parse_play(&args).map(|request| Some(Control::Enqueue(request)));
    }

    if !args.is_empty() {
        return Err(format!("{verb} takes no arguments"));
    }
    verb.parse::<PlaybackCommand>()
        .map(|command| Some(Control::Command(command)))
}

fn parse_play(args: &[&str]) -> Result<TrackRequest, String> {
    let (url, rest) = args.split_first().ok_or_else(|| PLAY_USAGE.to_string())?;
    let mut start = None;
    let mut duration = None;
    let mut end = None;
    let mut positional = 0usize;

    for arg in rest {
        let (slot, value) = match arg.split_once('=') {
            Some((key, value)) => {
                let slot = match key.to_ascii_lowercase().as_str() {
                    "start" | "begin" => &mut start,
                    "dur" | "duration" => &mut duration,
                    "end" => &mut end,
                    other => return Err(format!("unknown offset {other:?}; {PLAY_USAGE}")),
                };
                (slot, value)
            }
            None => {
                positional += 1;
                match positional {
                    1 => (&mut start, *arg),
                    2 => (&mut duration, *arg),
                    _ => return Err(PLAY_USAGE.to_string()),
                }
            }
        };
        if slot.is_some() {
            return Err(format!("offset given twice in {arg:?}"));
        }
        *slot = Some(parse_timespec(value)?);
    }

    track_request(url, start, duration, end)
}

/// Build a request from optional offsets. `end` is absolute and wins over `duration`.
pub fn track_request(
    url: &str,
    start: Option<Duration>,
    duration: Option<Duration>,
    end: Option<Duration>,
) -> Result<TrackRequest, String> {
    let start = start.unwrap_or_default();
    let duration = match end {
        Some(end) if end <= start => {
            return Err(format!(
                "end {}ms is not after start {}ms",
                end.as_millis(),
                start.as_millis()
            ));
        }
        Some(end) => end - start,
        None => duration.unwrap_or_default(),
    };
    Ok(TrackRequest::new(url)
        .with_start_ms(start.as_millis() as u64)
        .with_duration_ms(duration.as_millis() as u64))
}
