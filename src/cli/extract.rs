use std::fs::File;
use std::io::{BufWriter, Write};

use anyhow::{Context, Result, bail};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

use super::command::{Cli, ExtractArgs};
use crate::input::open_demuxer;
use crate::timestamp::ns_str;

pub fn cmd_extract(args: &ExtractArgs, cli: &Cli, multi: Option<&MultiProgress>) -> Result<()> {
    let mut demuxer = open_demuxer(&args.input, cli.fail_level())?;

    let tracks = demuxer.num_tracks()?;
    if args.track >= tracks {
        bail!("Track index must be below {tracks}, got {}", args.track);
    }
    if args.track >= 64 {
        bail!("Only the first 64 tracks can be selected, got {}", args.track);
    }
    let track = demuxer.track_info(args.track)?;
    log::info!(
        "Extracting track {} ({} {}) to {}",
        args.track,
        track.track_type,
        track.codec_id,
        args.output.display()
    );
    if track.comp_enabled && track.comp_method != matroska::model::CompMethod::Prepend {
        log::warn!(
            "Track {} is compressed with {:?}; payloads are written as stored",
            args.track,
            track.comp_method
        );
    }

    demuxer.set_track_mask(!(1u64 << args.track));

    let pb = match multi {
        Some(multi) => Some(create_progress_bar(multi, demuxer.segment_top())?),
        None => None,
    };

    let file = File::create(&args.output)
        .with_context(|| format!("cannot create {}", args.output.display()))?;
    let mut writer = BufWriter::new(file);

    let mut packets = 0u64;
    let mut bytes = 0u64;
    let mut last_time = 0;
    while let Some(packet) = demuxer.read_packet()? {
        writer.write_all(&packet.data)?;
        packets += 1;
        bytes += packet.data.len() as u64;
        last_time = packet.start_time;

        if let Some(ref pb) = pb {
            if packets.is_multiple_of(64) {
                pb.set_position(packet.file_pos);
                pb.set_message(format!("{packets} packets, {}", ns_str(last_time)));
            }
        }
    }
    writer.flush()?;

    if let Some(pb) = pb {
        pb.finish_and_clear();
    }
    demuxer.close();

    log::info!(
        "Wrote {packets} packets ({bytes} bytes) up to {}",
        ns_str(last_time)
    );
    Ok(())
}

/// A byte-position bar when the segment size is known, a spinner otherwise.
fn create_progress_bar(multi: &MultiProgress, segment_top: u64) -> Result<ProgressBar> {
    let pb = if segment_top < u64::MAX {
        let pb = multi.add(ProgressBar::new(segment_top));
        pb.set_style(ProgressStyle::with_template(
            "{bar:40.cyan/blue} {bytes}/{total_bytes} ({percent}%)\n{msg} | elapsed: {elapsed_precise} | ETA: {eta_precise}",
        )?);
        pb
    } else {
        let pb = multi.add(ProgressBar::new_spinner());
        pb.set_style(ProgressStyle::with_template("{spinner:.green} {msg}")?);
        pb.enable_steady_tick(std::time::Duration::from_millis(100));
        pb
    };
    Ok(pb)
}
