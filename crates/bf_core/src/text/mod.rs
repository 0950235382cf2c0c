//! Text preparation - speaker-attributed segmentation and
//! generation-sized chunking.

pub mod chunker;
pub mod segmenter;

pub use chunker::{chunk_text, split_breath_groups, split_sentences};
pub use segmenter::{parse_chapter_segments, validate_speaker_tags, Segment};
