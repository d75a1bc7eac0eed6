//! Capture / annotate / gallery workflow as an explicit state machine.
//!
//! Each browser session owns a [`Session`]. Every user action arrives as an
//! [`Event`] and [`Workflow::apply`] moves the session to its next state,
//! performing the camera and filesystem side effects on the way. Rendering
//! reads the session through [`Workflow::view`] and never mutates anything
//! but the one-shot notices.

use std::sync::Arc;

use facecap_common::params::{default_capture_name, DetectionParams};
use facecap_vision::{capture_and_detect, CameraSource, CapturedFrame, FaceDetector};
use tracing::{error, info, warn};

use crate::gallery::Gallery;

/// A one-line message shown on the next render only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Success(String),
    Info(String),
    Warning(String),
    Error(String),
}

#[derive(Debug, Default)]
pub enum CaptureState {
    #[default]
    Idle,
    Captured(Box<CapturedFrame>),
}

#[derive(Debug, Default, PartialEq, Eq)]
pub enum GalleryState {
    #[default]
    Idle,
    /// Images picked for deletion, waiting for the confirmation tick.
    SelectionPending(Vec<String>),
}

#[derive(Debug)]
pub struct Session {
    pub params: DetectionParams,
    pub capture: CaptureState,
    pub gallery: GalleryState,
    /// Bumped on every successful capture; lets the page bust image caches.
    pub capture_seq: u64,
    notices: Vec<Notice>,
}

impl Session {
    pub fn new(params: DetectionParams) -> Self {
        Self {
            params,
            capture: CaptureState::Idle,
            gallery: GalleryState::Idle,
            capture_seq: 0,
            notices: Vec::new(),
        }
    }

    pub fn notify(&mut self, notice: Notice) {
        self.notices.push(notice);
    }

    pub fn captured(&self) -> Option<&CapturedFrame> {
        match &self.capture {
            CaptureState::Captured(frame) => Some(frame.as_ref()),
            CaptureState::Idle => None,
        }
    }

    /// Full recomputation: both sub-machines back to their start, only the
    /// outcome of the action that triggered it survives.
    fn recompute(&mut self, notices: Vec<Notice>) {
        self.capture = CaptureState::Idle;
        self.gallery = GalleryState::Idle;
        self.notices = notices;
    }
}

#[derive(Debug)]
pub enum Event {
    /// Controls changed without arming the camera.
    SetParams(DetectionParams),
    Capture(DetectionParams),
    Discard,
    Save { name: String },
    Delete { selected: Vec<String>, confirmed: bool },
}

/// Everything one render needs.
#[derive(Debug)]
pub struct View<'a> {
    pub params: DetectionParams,
    pub capture: Option<&'a CapturedFrame>,
    pub capture_seq: u64,
    pub default_name: Option<String>,
    pub listing: Result<Vec<String>, String>,
    pub selection: &'a [String],
    pub notices: Vec<Notice>,
}

pub struct Workflow {
    camera: Arc<dyn CameraSource>,
    detector: Arc<dyn FaceDetector>,
    gallery: Gallery,
    defaults: DetectionParams,
    thickness: u32,
}

impl Workflow {
    pub fn new(
        camera: Arc<dyn CameraSource>,
        detector: Arc<dyn FaceDetector>,
        gallery: Gallery,
        defaults: DetectionParams,
        thickness: u32,
    ) -> Self {
        Self {
            camera,
            detector,
            gallery,
            defaults,
            thickness,
        }
    }

    pub fn gallery(&self) -> &Gallery {
        &self.gallery
    }

    pub fn new_session(&self) -> Session {
        Session::new(self.defaults)
    }

    pub fn apply(&self, session: &mut Session, event: Event) {
        match event {
            Event::SetParams(params) => {
                session.params = params;
            }
            Event::Capture(params) => {
                session.params = params;
                // The previous frame is gone whether or not this grab works.
                session.capture = CaptureState::Idle;
                match capture_and_detect(
                    self.camera.as_ref(),
                    self.detector.as_ref(),
                    &params,
                    self.thickness,
                ) {
                    Ok(frame) => {
                        session.capture_seq += 1;
                        session.capture = CaptureState::Captured(Box::new(frame));
                    }
                    Err(e) => {
                        warn!(error = %e, camera = self.camera.name(), "capture failed");
                        session.notify(Notice::Error(e.to_string()));
                    }
                }
            }
            Event::Discard => {
                session.capture = CaptureState::Idle;
            }
            Event::Save { name } => self.save(session, &name),
            Event::Delete {
                selected,
                confirmed,
            } => self.delete(session, selected, confirmed),
        }
    }

    fn save(&self, session: &mut Session, name: &str) {
        let Some(frame) = session.captured() else {
            session.notify(Notice::Warning(
                "Nothing to save: capture an image first.".into(),
            ));
            return;
        };
        let stem = match name.trim() {
            "" => default_capture_name(&frame.captured_at),
            typed => typed.to_string(),
        };
        match self.gallery.save(&frame.image, &stem) {
            Ok(path) => {
                let message = format!("Image saved: {}", path.display());
                session.recompute(vec![Notice::Success(message)]);
            }
            Err(e) => {
                // The frame stays so the user can retry under another name.
                error!(error = %e, name = %stem, "save failed");
                session.notify(Notice::Error(e.to_string()));
            }
        }
    }

    fn delete(&self, session: &mut Session, selected: Vec<String>, confirmed: bool) {
        if selected.is_empty() {
            session.gallery = GalleryState::Idle;
            session.notify(Notice::Info("Select at least one image to delete.".into()));
            return;
        }
        if !confirmed {
            session.gallery = GalleryState::SelectionPending(selected);
            session.notify(Notice::Warning(
                "Tick the confirmation box to delete the selected images.".into(),
            ));
            return;
        }

        let report = self.gallery.delete(&selected);
        info!(
            requested = selected.len(),
            removed = report.removed.len(),
            missing = report.missing.len(),
            failed = report.failed.len(),
            "batch delete finished"
        );

        let mut notices = vec![Notice::Success(format!(
            "{} image(s) deleted.",
            report.removed.len()
        ))];
        if !report.missing.is_empty() {
            notices.push(Notice::Info(format!(
                "{} image(s) were already gone.",
                report.missing.len()
            )));
        }
        for (name, reason) in report.failed {
            notices.push(Notice::Error(format!("Could not delete {name}: {reason}")));
        }
        session.recompute(notices);
    }

    /// Compute one render. Pending notices are handed over and cleared.
    pub fn view<'a>(&self, session: &'a mut Session) -> View<'a> {
        let notices = std::mem::take(&mut session.notices);
        let session: &'a Session = session;
        let listing = self.gallery.list().map_err(|e| {
            error!(error = %e, "failed to list gallery");
            e.to_string()
        });
        let selection: &[String] = match &session.gallery {
            GalleryState::SelectionPending(names) => names,
            GalleryState::Idle => &[],
        };
        let capture = session.captured();
        View {
            params: session.params,
            capture,
            capture_seq: session.capture_seq,
            default_name: capture.map(|f| default_capture_name(&f.captured_at)),
            listing,
            selection,
            notices,
        }
    }
}
