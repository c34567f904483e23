use api::request::{RequestTime, ScheduleRecording};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tracing::debug;

use crate::catalog::Catalog;
use crate::error::ScheduleError;
use crate::guide::{resolve_program, GuideProvider, ProgramWindow};
use crate::recording::NewRecording;

/// Reduces every accepted request shape to one canonical creation input.
///
/// | start | stop | window                                  |
/// |-------|------|-----------------------------------------|
/// | set   | set  | as given                                |
/// | -     | set  | now .. stop                             |
/// | set   | -    | program airing at `start` (or the next) |
/// | -     | -    | program airing now (or the next)        |
///
/// Guide-resolved windows keep the program's own start so that asking twice
/// for the same program derives the same recording id. Times without an
/// offset are read in `tz`.
pub async fn canonicalize(
    catalog: &Catalog,
    guide: &dyn GuideProvider,
    req: ScheduleRecording,
    tz: Tz,
    now: DateTime<Utc>,
) -> Result<NewRecording, ScheduleError> {
    let channel = catalog
        .resolve(req.channel.trim())
        .ok_or_else(|| ScheduleError::InvalidChannel(req.channel.clone()))?;
    let start = req.start.map(|t| to_utc(t, tz)).transpose()?;
    let stop = req.stop.map(|t| to_utc(t, tz)).transpose()?;

    let (start, stop, program) = match (start, stop) {
        (Some(start), Some(stop)) => {
            if stop <= start {
                return Err(ScheduleError::InvalidWindow(format!(
                    "stop {} is not after start {}",
                    stop.to_rfc3339(),
                    start.to_rfc3339()
                )));
            }
            let program = if req.title.is_none() {
                lookup_title(guide, &channel.id, start, now).await
            } else {
                None
            };
            (start, stop, program)
        }
        (None, Some(stop)) => {
            if stop <= now {
                return Err(ScheduleError::InvalidWindow(format!(
                    "stop {} is already in the past",
                    stop.to_rfc3339()
                )));
            }
            (now, stop, None)
        }
        (at, None) => {
            let window = resolve_program(guide, &channel.id, at, now).await?;
            (window.start, window.stop, Some(window))
        }
    };

    let title = req
        .title
        .filter(|t| !t.trim().is_empty())
        .or_else(|| program.as_ref().map(|p| p.title.clone()))
        .unwrap_or_else(|| {
            if channel.name.is_empty() {
                channel.id.clone()
            } else {
                channel.name.clone()
            }
        });
    let description = req
        .description
        .or_else(|| program.map(|p| p.description))
        .unwrap_or_default();

    Ok(NewRecording {
        channel: channel.id.clone(),
        stream: channel.stream.clone(),
        title,
        description,
        start,
        stop,
    })
}

fn to_utc(time: RequestTime, tz: Tz) -> Result<DateTime<Utc>, ScheduleError> {
    time.to_utc(&tz).ok_or_else(|| {
        ScheduleError::InvalidWindow(format!("{:?} does not exist in {}", time, tz))
    })
}

/// Best effort: an explicit window does not need the guide.
async fn lookup_title(
    guide: &dyn GuideProvider,
    channel: &str,
    start: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Option<ProgramWindow> {
    match resolve_program(guide, channel, Some(start), now).await {
        Ok(window) if window.contains(start) => Some(window),
        Ok(_) => None,
        Err(e) => {
            debug!("[scheduler] no title for {} at {}: {}", channel, start, e);
            None
        }
    }
}
