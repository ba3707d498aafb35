//! hushcut - mute profanity in videos
//!
//! Scans subtitles for lexicon terms, turns the matching cues into a mute
//! timeline, and remuxes the video with ffmpeg so those spans are silent.

pub mod cli;
pub mod config;
pub mod workflow;
pub mod lexicon;
pub mod subtitle;
pub mod timeline;
pub mod sidefile;
pub mod media;
pub mod error;
