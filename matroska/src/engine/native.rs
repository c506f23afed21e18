//! Engine-native chapter and tag records.
//!
//! The engine keeps nested metadata in flat tables. A record refers to its
//! children, tracks, displays and so on through a [`Span`]: a count and the
//! index of the first entry in the relevant table. Entries behind one span
//! are contiguous. These records are what [`model::convert`] turns into the
//! owned tree types.
//!
//! [`model::convert`]: crate::model::convert

use crate::model::{Chapter, ChapterDisplay, SimpleTag, Tag, Target};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start: u32,
    pub len: u32,
}

impl Span {
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    fn slice<'a, T>(&self, items: &'a [T]) -> &'a [T] {
        let start = self.start as usize;
        items.get(start..start + self.len as usize).unwrap_or(&[])
    }

    fn append<T>(items: &mut Vec<T>, new: Vec<T>) -> Span {
        let span = Span {
            start: items.len() as u32,
            len: new.len() as u32,
        };
        items.extend(new);
        span
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChapterRecord {
    pub uid: u64,
    pub start: u64,
    pub end: u64,
    pub segment_uid: [u8; 16],
    pub hidden: bool,
    pub enabled: bool,
    pub default: bool,
    pub ordered: bool,
    pub tracks: Span,
    pub displays: Span,
    pub processes: Span,
    pub children: Span,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProcessRecord {
    pub codec_id: u32,
    pub codec_private: Vec<u8>,
    pub commands: Span,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandRecord {
    pub time: u32,
    pub command: Vec<u8>,
}

/// All chapters of a session. Editions are the root records.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChapterTable {
    roots: Span,
    chapters: Vec<ChapterRecord>,
    tracks: Vec<u64>,
    displays: Vec<ChapterDisplay>,
    processes: Vec<ProcessRecord>,
    commands: Vec<CommandRecord>,
}

impl ChapterTable {
    pub fn roots(&self) -> &[ChapterRecord] {
        self.roots.slice(&self.chapters)
    }

    pub fn children(&self, chapter: &ChapterRecord) -> &[ChapterRecord] {
        chapter.children.slice(&self.chapters)
    }

    pub fn tracks(&self, chapter: &ChapterRecord) -> &[u64] {
        chapter.tracks.slice(&self.tracks)
    }

    pub fn displays(&self, chapter: &ChapterRecord) -> &[ChapterDisplay] {
        chapter.displays.slice(&self.displays)
    }

    pub fn processes(&self, chapter: &ChapterRecord) -> &[ProcessRecord] {
        chapter.processes.slice(&self.processes)
    }

    pub fn commands(&self, process: &ProcessRecord) -> &[CommandRecord] {
        process.commands.slice(&self.commands)
    }

    pub fn total(&self) -> usize {
        self.chapters.len()
    }

    /// Appends sibling records. Their own children must already be in the
    /// table.
    pub fn push_chapters(&mut self, chapters: Vec<ChapterRecord>) -> Span {
        Span::append(&mut self.chapters, chapters)
    }

    pub fn push_tracks(&mut self, tracks: Vec<u64>) -> Span {
        Span::append(&mut self.tracks, tracks)
    }

    pub fn push_displays(&mut self, displays: Vec<ChapterDisplay>) -> Span {
        Span::append(&mut self.displays, displays)
    }

    pub fn push_processes(&mut self, processes: Vec<ProcessRecord>) -> Span {
        Span::append(&mut self.processes, processes)
    }

    pub fn push_commands(&mut self, commands: Vec<CommandRecord>) -> Span {
        Span::append(&mut self.commands, commands)
    }

    pub fn set_roots(&mut self, roots: Span) {
        self.roots = roots;
    }

    /// Flattens an owned chapter tree, for engines that build chapters in
    /// memory.
    pub fn from_chapters(editions: &[Chapter]) -> Self {
        let mut table = ChapterTable::default();
        let roots = table.push_level(editions);
        table.set_roots(roots);
        table
    }

    fn push_level(&mut self, chapters: &[Chapter]) -> Span {
        let records = chapters
            .iter()
            .map(|chapter| {
                let children = self.push_level(&chapter.children);
                let processes = chapter
                    .process
                    .iter()
                    .map(|process| ProcessRecord {
                        codec_id: process.codec_id,
                        codec_private: process.codec_private.clone(),
                        commands: self.push_commands(
                            process
                                .commands
                                .iter()
                                .map(|c| CommandRecord {
                                    time: c.time,
                                    command: c.command.clone(),
                                })
                                .collect(),
                        ),
                    })
                    .collect();
                ChapterRecord {
                    uid: chapter.uid,
                    start: chapter.start,
                    end: chapter.end,
                    segment_uid: chapter.segment_uid,
                    hidden: chapter.hidden,
                    enabled: chapter.enabled,
                    default: chapter.default,
                    ordered: chapter.ordered,
                    tracks: self.push_tracks(chapter.tracks.clone()),
                    displays: self.push_displays(chapter.display.clone()),
                    processes: self.push_processes(processes),
                    children,
                }
            })
            .collect();
        self.push_chapters(records)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TagRecord {
    pub targets: Span,
    pub simple_tags: Span,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TagTable {
    tags: Vec<TagRecord>,
    targets: Vec<Target>,
    simple_tags: Vec<SimpleTag>,
}

impl TagTable {
    pub fn tags(&self) -> &[TagRecord] {
        &self.tags
    }

    pub fn targets(&self, tag: &TagRecord) -> &[Target] {
        tag.targets.slice(&self.targets)
    }

    pub fn simple_tags(&self, tag: &TagRecord) -> &[SimpleTag] {
        tag.simple_tags.slice(&self.simple_tags)
    }

    pub fn push_tag(&mut self, targets: Vec<Target>, simple_tags: Vec<SimpleTag>) {
        let targets = Span::append(&mut self.targets, targets);
        let simple_tags = Span::append(&mut self.simple_tags, simple_tags);
        self.tags.push(TagRecord {
            targets,
            simple_tags,
        });
    }

    pub fn from_tags(tags: &[Tag]) -> Self {
        let mut table = TagTable::default();
        for tag in tags {
            table.push_tag(tag.targets.clone(), tag.simple_tags.clone());
        }
        table
    }
}
