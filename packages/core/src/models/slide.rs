//! Narrative Nodes
//!
//! Slides ("stories") are chained with `next` edges into a narrative and may
//! point at the state they present through a `jumpTo` edge. A slide without
//! a jump target is a text slide.

use serde::{Deserialize, Serialize};

/// Default display time of a slide in milliseconds
pub const DEFAULT_SLIDE_DURATION: f64 = 1500.0;
/// Default transition time between two slides in milliseconds
pub const DEFAULT_SLIDE_TRANSITION: f64 = 0.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnnotationKind {
    Text,
    Arrow,
    Frame,
}

/// Overlay drawn on top of a slide
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Annotation {
    #[serde(rename = "type")]
    pub kind: AnnotationKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Anchor position as `[x, y]` in percent of the slide area
    pub pos: [f64; 2],
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<[f64; 2]>,
}

impl Annotation {
    pub fn text(text: impl Into<String>, pos: [f64; 2]) -> Self {
        Self {
            kind: AnnotationKind::Text,
            text: Some(text.into()),
            pos,
            size: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlideNode {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub duration: f64,
    pub transition: f64,
    #[serde(default)]
    pub annotations: Vec<Annotation>,
}

impl Default for SlideNode {
    fn default() -> Self {
        Self {
            name: String::new(),
            description: String::new(),
            duration: DEFAULT_SLIDE_DURATION,
            transition: DEFAULT_SLIDE_TRANSITION,
            annotations: Vec::new(),
        }
    }
}

impl SlideNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Slide showing only a centered title
    pub fn text_slide(title: impl Into<String>) -> Self {
        let title = title.into();
        Self {
            annotations: vec![Annotation::text(title.clone(), [50.0, 40.0])],
            name: title,
            ..Default::default()
        }
    }

    /// Copies every presentation attribute of `other` onto this slide
    pub fn copy_presentation_from(&mut self, other: &SlideNode) {
        self.name = other.name.clone();
        self.description = other.description.clone();
        self.duration = other.duration;
        self.transition = other.transition;
        self.annotations = other.annotations.clone();
    }
}
