use anyhow::Result;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use serde::Serialize;

use super::command::{Cli, InfoArgs, InfoFormat};
use crate::input::open_demuxer;
use crate::timestamp::ns_str;
use matroska::demuxer::Demuxer;
use matroska::model::{Attachment, Chapter, Cue, SegmentInfo, Tag, TrackInfo, TrackType};

pub fn cmd_info(args: &InfoArgs, cli: &Cli, multi: Option<&MultiProgress>) -> Result<()> {
    log::info!("Analyzing Matroska file: {}", args.input.display());

    let pb = match multi {
        Some(multi) => {
            let pb = multi.add(ProgressBar::new_spinner());
            pb.set_style(ProgressStyle::with_template("{spinner:.green} {msg}")?);
            pb.enable_steady_tick(std::time::Duration::from_millis(100));
            pb.set_message("Reading metadata...");
            Some(pb)
        }
        None => None,
    };

    let mut demuxer = open_demuxer(&args.input, cli.fail_level())?;
    let report = Report::collect(&mut demuxer)?;
    demuxer.close();

    if let Some(pb) = pb {
        pb.finish_and_clear();
    }

    match args.format {
        InfoFormat::Text => display_report(&report),
        InfoFormat::Yaml => print!("{}", serde_yaml_ng::to_string(&report)?),
        InfoFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
    }

    Ok(())
}

#[derive(Debug, Serialize)]
struct Report {
    segment: SegmentInfo,
    tracks: Vec<TrackInfo>,
    chapters: Vec<Chapter>,
    tags: Vec<Tag>,
    cues: Vec<Cue>,
    attachments: Vec<Attachment>,
    positions: Positions,
}

#[derive(Debug, Serialize)]
struct Positions {
    segment: u64,
    segment_top: u64,
    cues: u64,
    cues_top: u64,
}

impl Report {
    fn collect(demuxer: &mut Demuxer) -> Result<Self> {
        let tracks = (0..demuxer.num_tracks()?)
            .map(|index| demuxer.track_info(index))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            segment: demuxer.file_info()?,
            tracks,
            chapters: demuxer.chapters(),
            tags: demuxer.tags(),
            cues: demuxer.cues(),
            attachments: demuxer.attachments(),
            positions: Positions {
                segment: demuxer.segment(),
                segment_top: demuxer.segment_top(),
                cues: demuxer.cues_pos(),
                cues_top: demuxer.cues_top_pos(),
            },
        })
    }
}

fn display_report(report: &Report) {
    println!();
    println!("Matroska File Information");
    println!("=========================");
    println!();

    display_segment_info(&report.segment);
    for (index, track) in report.tracks.iter().enumerate() {
        display_track_info(index, track);
    }
    if !report.chapters.is_empty() {
        display_chapters(&report.chapters);
    }
    if !report.tags.is_empty() {
        display_tags(&report.tags);
    }
    if !report.attachments.is_empty() {
        display_attachments(&report.attachments);
    }
    display_index(report);
}

fn display_segment_info(info: &SegmentInfo) {
    println!("Segment Information");
    if !info.title.is_empty() {
        println!("  Title                     {}", info.title);
    }
    println!("  Segment UID               {}", hex(&info.uid));
    println!("  Duration                  {}", ns_str(info.duration));
    println!("  Timecode scale            {} ns", info.timecode_scale);
    println!("  Muxing application        {}", info.muxing_app);
    println!("  Writing application       {}", info.writing_app);
    if info.date_utc_valid {
        println!("  Date (ns since 2001)      {}", info.date_utc);
    }
    if info.prev_uid != [0; 16] {
        println!("  Previous segment          {}", hex(&info.prev_uid));
    }
    if info.next_uid != [0; 16] {
        println!("  Next segment              {}", hex(&info.next_uid));
    }
    println!();
}

fn display_track_info(index: usize, track: &TrackInfo) {
    println!("Track {index}");
    println!("  Number                    {}", track.number);
    println!("  Type                      {}", track.track_type);
    println!("  Codec                     {}", track.codec_id);
    if !track.codec_private.is_empty() {
        println!("  Codec private             {} bytes", track.codec_private.len());
    }
    if !track.name.is_empty() {
        println!("  Name                      {}", track.name);
    }
    println!("  Language                  {}", track.language);
    println!(
        "  Flags                     {}",
        track_flags(track).join(", ")
    );
    if track.default_duration > 0 {
        println!(
            "  Default duration          {:.3} ms",
            track.default_duration as f64 / 1_000_000.0
        );
    }
    if track.comp_enabled {
        println!("  Compression               {:?}", track.comp_method);
    }

    match track.track_type {
        TrackType::Video => {
            let video = &track.video;
            println!(
                "  Pixel size                {}x{}",
                video.pixel_width, video.pixel_height
            );
            println!(
                "  Display size              {}x{}",
                video.display_width, video.display_height
            );
            if video.interlaced {
                println!("  Interlaced                true");
            }
        }
        TrackType::Audio => {
            let audio = &track.audio;
            println!("  Sampling rate             {} Hz", audio.sampling_freq);
            if audio.output_sampling_freq != audio.sampling_freq {
                println!("  Output sampling rate      {} Hz", audio.output_sampling_freq);
            }
            println!("  Channels                  {}", audio.channels);
            if audio.bit_depth > 0 {
                println!("  Bit depth                 {}", audio.bit_depth);
            }
        }
        _ => {}
    }
    println!();
}

fn track_flags(track: &TrackInfo) -> Vec<&'static str> {
    [
        (track.enabled, "enabled"),
        (track.default, "default"),
        (track.forced, "forced"),
        (track.lacing, "lacing"),
    ]
    .into_iter()
    .filter_map(|(set, name)| set.then_some(name))
    .collect()
}

fn display_chapters(editions: &[Chapter]) {
    println!("Chapters");
    // Printed from an explicit stack; chapter trees can nest arbitrarily deep.
    let mut stack: Vec<(usize, &Chapter)> = editions.iter().rev().map(|c| (0, c)).collect();
    while let Some((depth, chapter)) = stack.pop() {
        let indent = "  ".repeat(depth + 1);
        let title = chapter
            .display
            .first()
            .map(|d| d.string.as_str())
            .unwrap_or("");
        if depth == 0 {
            println!("{indent}Edition {:<18}{}", chapter.uid, if chapter.default { "default" } else { "" });
        } else {
            println!(
                "{indent}{} - {}  {title}{}",
                ns_str(chapter.start),
                ns_str(chapter.end),
                if chapter.hidden { " (hidden)" } else { "" }
            );
        }
        stack.extend(chapter.children.iter().rev().map(|c| (depth + 1, c)));
    }
    println!();
}

fn display_tags(tags: &[Tag]) {
    println!("Tags");
    for tag in tags {
        let targets = tag
            .targets
            .iter()
            .map(|t| format!("{:?} {}", t.target_type, t.uid))
            .collect::<Vec<_>>()
            .join(", ");
        println!(
            "  Targets                   {}",
            if targets.is_empty() { "file" } else { &targets }
        );
        for simple in &tag.simple_tags {
            println!("    {:<22}  {}", simple.name, simple.value);
        }
    }
    println!();
}

fn display_attachments(attachments: &[Attachment]) {
    println!("Attachments");
    for attachment in attachments {
        println!(
            "  {:<24}  {} ({} bytes at {})",
            attachment.name, attachment.mime_type, attachment.length, attachment.position
        );
    }
    println!();
}

fn display_index(report: &Report) {
    let positions = &report.positions;
    println!("Index");
    println!("  Segment data at           {}", positions.segment);
    println!("  Segment end               {}", positions.segment_top);
    if report.cues.is_empty() {
        println!("  Cues                      none");
    } else {
        println!(
            "  Cues                      {} points at {}..{}",
            report.cues.len(),
            positions.cues,
            positions.cues_top
        );
    }
    println!();
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
