//! In-memory Matroska files for tests.

use crate::engine::elements as id;
use crate::engine::{IO_ERROR, InputStream};

pub const SCALE: u64 = 1_000_000;
pub const VIDEO_UID: u64 = 0x1111;
pub const AUDIO_UID: u64 = 0x2222;
pub const CLUSTER_MS: u64 = 200;

pub struct MemoryInput {
    data: Vec<u8>,
    pos: u64,
    sequential: bool,
}

impl MemoryInput {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            pos: 0,
            sequential: false,
        }
    }

    /// Fails any read that doesn't continue where the last one stopped.
    pub fn sequential(data: Vec<u8>) -> Self {
        Self {
            sequential: true,
            ..Self::new(data)
        }
    }
}

impl InputStream for MemoryInput {
    fn read(&mut self, pos: u64, buf: &mut [u8]) -> i64 {
        if self.sequential && pos != self.pos {
            return IO_ERROR;
        }
        let start = (pos as usize).min(self.data.len());
        let n = buf.len().min(self.data.len() - start);
        buf[..n].copy_from_slice(&self.data[start..start + n]);
        self.pos = pos + n as u64;
        n as i64
    }

    fn file_size(&mut self) -> i64 {
        if self.sequential {
            IO_ERROR
        } else {
            self.data.len() as i64
        }
    }
}

fn id_bytes(id: u32) -> Vec<u8> {
    let bytes = id.to_be_bytes();
    let skip = bytes.iter().take_while(|&&b| b == 0).count().min(3);
    bytes[skip..].to_vec()
}

pub fn vint(value: u64) -> Vec<u8> {
    let len = (1..=8)
        .find(|&len| value < (1u64 << (7 * len)) - 1)
        .unwrap_or(8);
    let mut out = value.to_be_bytes()[8 - len..].to_vec();
    out[0] |= 0x80 >> (len - 1);
    out
}

pub fn element(id: u32, payload: &[u8]) -> Vec<u8> {
    let mut out = id_bytes(id);
    out.extend(vint(payload.len() as u64));
    out.extend_from_slice(payload);
    out
}

pub fn unknown_size(id: u32, payload: &[u8]) -> Vec<u8> {
    let mut out = id_bytes(id);
    out.extend([0x01, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]);
    out.extend_from_slice(payload);
    out
}

pub fn master(id: u32, children: &[Vec<u8>]) -> Vec<u8> {
    element(id, &children.concat())
}

pub fn uint(value: u64) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let skip = bytes.iter().take_while(|&&b| b == 0).count().min(7);
    bytes[skip..].to_vec()
}

pub fn float(value: f64) -> Vec<u8> {
    value.to_be_bytes().to_vec()
}

pub fn ebml_header(doc_type: &str) -> Vec<u8> {
    master(
        id::EBML,
        &[
            element(id::EBML_READ_VERSION, &uint(1)),
            element(id::DOC_TYPE, doc_type.as_bytes()),
            element(id::DOC_TYPE_READ_VERSION, &uint(2)),
        ],
    )
}

pub fn info(duration_ms: f64) -> Vec<u8> {
    master(
        id::INFO,
        &[
            element(id::SEGMENT_UID, &[0xA5; 16]),
            element(id::TIMECODE_SCALE, &uint(SCALE)),
            element(id::DURATION, &float(duration_ms)),
            element(id::TITLE, b"fixture"),
            element(id::MUXING_APP, b"mux"),
            element(id::WRITING_APP, b"writer"),
        ],
    )
}

pub fn video_track(number: u64, uid: u64, default_duration: u64) -> Vec<u8> {
    master(
        id::TRACK_ENTRY,
        &[
            element(id::TRACK_NUMBER, &uint(number)),
            element(id::TRACK_UID, &uint(uid)),
            element(id::TRACK_TYPE, &uint(1)),
            element(id::CODEC_ID, b"V_VP9"),
            element(id::DEFAULT_DURATION, &uint(default_duration)),
            master(
                id::VIDEO,
                &[
                    element(id::PIXEL_WIDTH, &uint(320)),
                    element(id::PIXEL_HEIGHT, &uint(240)),
                ],
            ),
        ],
    )
}

pub fn audio_track(number: u64, uid: u64, default_duration: u64) -> Vec<u8> {
    master(
        id::TRACK_ENTRY,
        &[
            element(id::TRACK_NUMBER, &uint(number)),
            element(id::TRACK_UID, &uint(uid)),
            element(id::TRACK_TYPE, &uint(2)),
            element(id::CODEC_ID, b"A_OPUS"),
            element(id::CODEC_PRIVATE, b"OpusHead"),
            element(id::LANGUAGE, b"fra"),
            element(id::DEFAULT_DURATION, &uint(default_duration)),
            master(
                id::AUDIO,
                &[
                    element(id::SAMPLING_FREQUENCY, &float(48000.0)),
                    element(id::CHANNELS, &uint(2)),
                ],
            ),
        ],
    )
}

pub fn block_body(track: u64, rel: i16, flags: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = vint(track);
    out.extend(rel.to_be_bytes());
    out.push(flags);
    out.extend_from_slice(payload);
    out
}

pub fn simple_block(track: u64, rel: i16, keyframe: bool, payload: &[u8]) -> Vec<u8> {
    let flags = if keyframe { 0x80 } else { 0x00 };
    element(id::SIMPLE_BLOCK, &block_body(track, rel, flags, payload))
}

pub fn cluster(timecode: u64, blocks: &[Vec<u8>]) -> Vec<u8> {
    let mut children = vec![element(id::TIMESTAMP, &uint(timecode))];
    children.extend_from_slice(blocks);
    master(id::CLUSTER, &children)
}

pub fn chapters() -> Vec<u8> {
    let display = |name: &str| {
        master(
            id::CHAPTER_DISPLAY,
            &[
                element(id::CHAP_STRING, name.as_bytes()),
                element(id::CHAP_LANGUAGE, b"eng"),
            ],
        )
    };
    let nested = master(
        id::CHAPTER_ATOM,
        &[
            element(id::CHAPTER_UID, &uint(11)),
            element(id::CHAPTER_TIME_START, &uint(100_000_000)),
            display("Intro detail"),
        ],
    );
    master(
        id::CHAPTERS,
        &[master(
            id::EDITION_ENTRY,
            &[
                element(id::EDITION_UID, &uint(1)),
                element(id::EDITION_FLAG_DEFAULT, &uint(1)),
                master(
                    id::CHAPTER_ATOM,
                    &[
                        element(id::CHAPTER_UID, &uint(10)),
                        element(id::CHAPTER_TIME_START, &uint(0)),
                        element(id::CHAPTER_TIME_END, &uint(500_000_000)),
                        display("Intro"),
                        nested,
                    ],
                ),
                master(
                    id::CHAPTER_ATOM,
                    &[
                        element(id::CHAPTER_UID, &uint(20)),
                        element(id::CHAPTER_TIME_START, &uint(500_000_000)),
                        element(id::CHAPTER_FLAG_HIDDEN, &uint(1)),
                        master(
                            id::CHAPTER_TRACK,
                            &[element(id::CHAPTER_TRACK_UID, &uint(VIDEO_UID))],
                        ),
                        display("Main"),
                    ],
                ),
            ],
        )],
    )
}

pub fn tags() -> Vec<u8> {
    master(
        id::TAGS,
        &[master(
            id::TAG,
            &[
                master(
                    id::TARGETS,
                    &[
                        element(id::TARGET_TYPE_VALUE, &uint(50)),
                        element(id::TAG_TRACK_UID, &uint(VIDEO_UID)),
                    ],
                ),
                master(
                    id::SIMPLE_TAG,
                    &[
                        element(id::TAG_NAME, b"TITLE"),
                        element(id::TAG_STRING, b"Picture"),
                    ],
                ),
            ],
        )],
    )
}

pub fn attachments() -> Vec<u8> {
    master(
        id::ATTACHMENTS,
        &[master(
            id::ATTACHED_FILE,
            &[
                element(id::FILE_NAME, b"cover.png"),
                element(id::FILE_MIME_TYPE, b"image/png"),
                element(id::FILE_UID, &uint(77)),
                element(id::FILE_DATA, &[0x89, b'P', b'N', b'G']),
            ],
        )],
    )
}

/// Payload of the `index`-th frame of a cluster: `v` or `a`, cluster, index.
pub fn frame_payload(kind: u8, cluster: usize, index: usize) -> Vec<u8> {
    vec![kind, cluster as u8, index as u8]
}

/// Five video and five audio frames per cluster, interleaved by time: video
/// at 0, 40, .. 160 ms with a keyframe only at 0, audio at 20, 60, .. 180 ms.
pub fn standard_clusters(count: usize) -> Vec<(u64, Vec<u8>)> {
    (0..count)
        .map(|c| {
            let timecode = c as u64 * CLUSTER_MS;
            let blocks: Vec<_> = (0..5)
                .flat_map(|i| {
                    let rel = (i * 40) as i16;
                    [
                        simple_block(1, rel, i == 0, &frame_payload(b'v', c, i)),
                        simple_block(2, rel + 20, true, &frame_payload(b'a', c, i)),
                    ]
                })
                .collect();
            (timecode, cluster(timecode, &blocks))
        })
        .collect()
}

/// Builds a complete file.
///
/// `head` goes between the SeekHead and the first cluster. With `cues`, a
/// Cues element pointing at every cluster is written after the clusters and
/// is reachable only through the SeekHead.
pub fn build_file(head: &[Vec<u8>], clusters: &[(u64, Vec<u8>)], cues: bool) -> Vec<u8> {
    let seek_head = |cues_pos: u64| {
        master(
            id::SEEK_HEAD,
            &[master(
                id::SEEK,
                &[
                    element(id::SEEK_ID, &id::CUES.to_be_bytes()),
                    element(id::SEEK_POSITION, &cues_pos.to_be_bytes()),
                ],
            )],
        )
    };

    let head_len: usize = head.iter().map(Vec::len).sum();
    let seek_len = if cues { seek_head(0).len() } else { 0 };
    let mut cluster_pos = (seek_len + head_len) as u64;
    let mut points = Vec::new();
    for (timecode, bytes) in clusters {
        points.push(master(
            id::CUE_POINT,
            &[
                element(id::CUE_TIME, &uint(*timecode)),
                master(
                    id::CUE_TRACK_POSITIONS,
                    &[
                        element(id::CUE_TRACK, &uint(1)),
                        element(id::CUE_CLUSTER_POSITION, &uint(cluster_pos)),
                    ],
                ),
            ],
        ));
        cluster_pos += bytes.len() as u64;
    }

    let mut body = Vec::new();
    if cues {
        body.extend(seek_head(cluster_pos));
    }
    for part in head {
        body.extend_from_slice(part);
    }
    for (_, bytes) in clusters {
        body.extend_from_slice(bytes);
    }
    if cues {
        body.extend(master(id::CUES, &points));
    }

    let mut file = ebml_header("webm");
    file.extend(element(id::SEGMENT, &body));
    file
}

/// Video and audio tracks, chapters, tags and an attachment, `clusters`
/// clusters of standard content and optional cues.
pub fn standard_file(clusters: usize, cues: bool) -> Vec<u8> {
    let head = vec![
        info((clusters as u64 * CLUSTER_MS) as f64),
        master(
            id::TRACKS,
            &[
                video_track(1, VIDEO_UID, 40_000_000),
                audio_track(2, AUDIO_UID, 40_000_000),
            ],
        ),
        chapters(),
        tags(),
        attachments(),
    ];
    build_file(&head, &standard_clusters(clusters), cues)
}

#[test]
fn vints_use_the_shortest_form() {
    assert_eq!(vint(1), [0x81]);
    assert_eq!(vint(126), [0xFE]);
    // 127 is the reserved unknown size in one byte.
    assert_eq!(vint(127), [0x40, 0x7F]);
    assert_eq!(element(id::VOID, &[]), [0xEC, 0x80]);
}
