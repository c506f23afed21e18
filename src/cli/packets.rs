use anyhow::{Result, bail};
use indicatif::MultiProgress;

use super::command::{Cli, PacketsArgs};
use crate::input::open_demuxer;
use crate::timestamp::ns_str;
use matroska::engine::SeekMode;
use matroska::model::Packet;

pub fn cmd_packets(args: &PacketsArgs, cli: &Cli, _multi: Option<&MultiProgress>) -> Result<()> {
    let mut demuxer = open_demuxer(&args.input, cli.fail_level())?;
    let tracks = demuxer.num_tracks()?;
    log::info!("{} tracks in {}", tracks, args.input.display());

    demuxer.set_track_mask(args.mask);
    if let Some(target) = args.seek {
        let mode = if args.keyframe {
            SeekMode::PrevKeyframe
        } else {
            SeekMode::Exact
        };
        demuxer.seek(target, mode);
        if !demuxer.last_error().is_empty() {
            bail!("seek to {} failed: {}", ns_str(target), demuxer.last_error());
        }
    }

    println!("{:>5}  {:>12}  {:>12}  {:>8}  {:>12}  flags", "track", "start", "end", "size", "position");
    let mut count = 0usize;
    while args.limit.is_none_or(|limit| count < limit) {
        let Some(packet) = demuxer.read_packet()? else {
            break;
        };
        println!("{}", packet_line(&packet));
        count += 1;
    }
    log::info!("{count} packets");

    demuxer.close();
    Ok(())
}

fn packet_line(packet: &Packet) -> String {
    let mut flags = String::new();
    for (set, flag) in [
        (packet.is_keyframe(), 'K'),
        (packet.is_discardable(), 'D'),
        (packet.is_gap(), 'G'),
        (packet.has_unknown_start(), 'S'),
        (packet.has_unknown_end(), 'E'),
    ] {
        flags.push(if set { flag } else { '.' });
    }
    let mut line = format!(
        "{:>5}  {:>12}  {:>12}  {:>8}  {:>12}  {flags}",
        packet.track,
        ns_str(packet.start_time),
        ns_str(packet.end_time),
        packet.data.len(),
        packet.file_pos,
    );
    if packet.discard != 0 {
        line.push_str(&format!("  discard {} ns", packet.discard));
    }
    line
}
