use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use std::path::Path;
use std::time::{Duration, Instant};

use crate::engine::{Enforcement, FaceRegion, RecognitionEngine};
use crate::registry::{FacultyRecord, FacultyRegistry};
use crate::resolver::{identity_key_from_path, MatchResolver};

const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const BAND_COLOR: Rgb<u8> = Rgb([0, 0, 0]);
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

/// Height of the caption band drawn under each face box
const BAND_HEIGHT: u32 = 45;

/// (offset below the box, pixel height) for name, designation, department
const TEXT_LINES: [(i32, f32); 3] = [(3, 15.0), (18, 13.0), (31, 11.0)];

/// A recognized face as shown on the live display
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotatedFace {
    pub record: FacultyRecord,
    pub region: FaceRegion,
}

/// Polling state for the live video loop.
///
/// Idle between polls, showing the last known faces; a poll runs the
/// resolver once and returns to idle straight away. A failed poll clears
/// the faces so an old identity is never drawn over a new face.
pub struct LiveTracker {
    interval: Duration,
    last_poll: Instant,
    faces: Vec<AnnotatedFace>,
}

impl LiveTracker {
    pub fn new(interval: Duration, now: Instant) -> Self {
        Self {
            interval,
            last_poll: now,
            faces: Vec::new(),
        }
    }

    pub fn faces(&self) -> &[AnnotatedFace] {
        &self.faces
    }

    /// Whether enough time has passed for the next poll
    pub fn due(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_poll) > self.interval
    }

    /// Poll if due. Returns whether a poll happened.
    pub fn tick<E: RecognitionEngine>(
        &mut self,
        now: Instant,
        frame: &RgbImage,
        resolver: &mut MatchResolver<E>,
        registry: &FacultyRegistry,
    ) -> bool {
        if !self.due(now) {
            return false;
        }
        self.poll(now, frame, resolver, registry);
        true
    }

    /// Run one resolver call and replace the displayed faces
    pub fn poll<E: RecognitionEngine>(
        &mut self,
        now: Instant,
        frame: &RgbImage,
        resolver: &mut MatchResolver<E>,
        registry: &FacultyRegistry,
    ) {
        self.last_poll = now;

        match resolver.resolve(frame, Enforcement::Relaxed) {
            Ok(candidates) => {
                let mut faces: Vec<AnnotatedFace> = Vec::new();
                for candidate in candidates {
                    if faces.iter().any(|f| f.region == candidate.region) {
                        continue;
                    }
                    let record = identity_key_from_path(&candidate.identity)
                        .and_then(|key| registry.lookup(&key));
                    if let Some(record) = record {
                        faces.push(AnnotatedFace {
                            record: record.clone(),
                            region: candidate.region,
                        });
                    }
                }
                self.faces = faces;
            }
            Err(e) => {
                log::warn!("Live recognition failed, clearing display: {}", e);
                self.faces.clear();
            }
        }
    }
}

/// Load the caption font, logging and returning `None` on failure
pub fn load_font(path: &Path) -> Option<FontVec> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) => {
            log::warn!("Failed to read font {}: {}", path.display(), e);
            return None;
        }
    };

    match FontVec::try_from_vec(bytes) {
        Ok(font) => Some(font),
        Err(e) => {
            log::warn!("Invalid font {}: {}", path.display(), e);
            None
        }
    }
}

/// Draw a box and a caption band for every face. Captions need a font.
pub fn annotate(frame: &mut RgbImage, faces: &[AnnotatedFace], font: Option<&FontVec>) {
    for face in faces {
        let FaceRegion {
            x,
            y,
            width,
            height,
        } = face.region;

        draw_hollow_rect_mut(frame, Rect::at(x, y).of_size(width, height), BOX_COLOR);
        if width > 2 && height > 2 {
            draw_hollow_rect_mut(
                frame,
                Rect::at(x + 1, y + 1).of_size(width - 2, height - 2),
                BOX_COLOR,
            );
        }

        let band_top = y + height as i32;
        draw_filled_rect_mut(
            frame,
            Rect::at(x, band_top).of_size(width, BAND_HEIGHT),
            BAND_COLOR,
        );

        let Some(font) = font else {
            continue;
        };

        let lines = [
            &face.record.full_name,
            &face.record.designation,
            &face.record.department,
        ];
        for (text, (offset, size)) in lines.iter().zip(TEXT_LINES) {
            draw_text_mut(
                frame,
                TEXT_COLOR,
                x + 6,
                band_top + offset,
                PxScale::from(size),
                font,
                text.as_str(),
            );
        }
    }
}
