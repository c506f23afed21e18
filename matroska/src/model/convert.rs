//! Conversion of engine-native records into owned model values.

use std::slice;

use log::warn;

use crate::engine::Frame;
use crate::engine::native::{ChapterRecord, ChapterTable, TagTable};
use crate::model::{Chapter, ChapterCommand, ChapterProcess, Packet, Tag};

/// A chapter whose children are still being converted.
struct Pending<'a> {
    children: slice::Iter<'a, ChapterRecord>,
    chapter: Chapter,
}

impl<'a> Pending<'a> {
    fn new(table: &'a ChapterTable, record: &'a ChapterRecord) -> Self {
        let process = table
            .processes(record)
            .iter()
            .map(|process| ChapterProcess {
                codec_id: process.codec_id,
                codec_private: process.codec_private.clone(),
                commands: table
                    .commands(process)
                    .iter()
                    .map(|command| ChapterCommand {
                        time: command.time,
                        command: command.command.clone(),
                    })
                    .collect(),
            })
            .collect();

        let children = table.children(record);
        Self {
            children: children.iter(),
            chapter: Chapter {
                uid: record.uid,
                start: record.start,
                end: record.end,
                tracks: table.tracks(record).to_vec(),
                display: table.displays(record).to_vec(),
                children: Vec::with_capacity(children.len()),
                process,
                segment_uid: record.segment_uid,
                hidden: record.hidden,
                enabled: record.enabled,
                default: record.default,
                ordered: record.ordered,
            },
        }
    }
}

/// Builds the owned chapter forest.
///
/// Runs on an explicit stack, so arbitrarily deep trees never grow the call
/// stack. Every node is visited at most `table.total()` times in total; a
/// table whose spans loop back on themselves is cut off there.
pub fn chapters(table: &ChapterTable) -> Vec<Chapter> {
    let roots = table.roots();
    let mut forest = Vec::with_capacity(roots.len());
    let mut stack: Vec<Pending> = Vec::new();
    let mut budget = table.total();

    for root in roots {
        stack.push(Pending::new(table, root));
        while let Some(top) = stack.last_mut() {
            if let Some(child) = top.children.next() {
                if budget == 0 {
                    warn!("chapter table references more chapters than it holds");
                    continue;
                }
                budget -= 1;
                stack.push(Pending::new(table, child));
                continue;
            }

            let Some(done) = stack.pop() else { break };
            match stack.last_mut() {
                Some(parent) => parent.chapter.children.push(done.chapter),
                None => forest.push(done.chapter),
            }
        }
    }

    forest
}

pub fn tags(table: &TagTable) -> Vec<Tag> {
    table
        .tags()
        .iter()
        .map(|tag| Tag {
            targets: table.targets(tag).to_vec(),
            simple_tags: table.simple_tags(tag).to_vec(),
        })
        .collect()
}

/// Copies a frame out of engine-owned memory.
pub fn packet(frame: &Frame<'_>) -> Packet {
    Packet {
        track: frame.track,
        start_time: frame.start_time,
        end_time: frame.end_time,
        file_pos: frame.file_pos,
        data: frame.data.to_vec(),
        flags: frame.flags,
        discard: frame.discard,
    }
}
