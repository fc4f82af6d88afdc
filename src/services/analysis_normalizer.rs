// src/services/analysis_normalizer.rs
use crate::models::*;

/// Words that mark a subject description as a person.
pub const PERSON_LEXICON: [&str; 6] = ["person", "man", "woman", "boy", "girl", "child"];

const EDGE_LOW: f64 = 0.33;
const EDGE_HIGH: f64 = 0.66;

/// Decides whether a detected subject should become a face region.
pub trait FaceHeuristic: Send + Sync {
    fn is_face(&self, photo_type: PhotoType, subject: &Subject) -> bool;
}

/// Case-insensitive substring match against a fixed word list.
///
/// This is a heuristic, not language understanding: a description such as
/// "toddler in a stroller" matches nothing and is missed unless the photo is
/// a portrait or group shot.
pub struct LexiconFaceHeuristic {
    lexicon: Vec<String>,
}

impl LexiconFaceHeuristic {
    pub fn new<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            lexicon: words
                .into_iter()
                .map(|w| w.as_ref().to_lowercase())
                .collect(),
        }
    }

    fn mentions_person(&self, description: &str) -> bool {
        let description = description.to_lowercase();
        self.lexicon.iter().any(|word| description.contains(word))
    }
}

impl Default for LexiconFaceHeuristic {
    fn default() -> Self {
        Self::new(PERSON_LEXICON)
    }
}

impl FaceHeuristic for LexiconFaceHeuristic {
    fn is_face(&self, photo_type: PhotoType, subject: &Subject) -> bool {
        if subject.distinctive_features.is_empty() {
            return false;
        }
        matches!(photo_type, PhotoType::Portrait | PhotoType::Group)
            || self.mentions_person(&subject.description)
    }
}

/// Maps the vision model's rich analysis into the shape prompt composition
/// consumes. Total: degenerate input still yields at least one element.
pub struct AnalysisNormalizer {
    face_heuristic: Box<dyn FaceHeuristic>,
}

impl AnalysisNormalizer {
    pub fn new() -> Self {
        Self::with_heuristic(Box::new(LexiconFaceHeuristic::default()))
    }

    pub fn with_heuristic(face_heuristic: Box<dyn FaceHeuristic>) -> Self {
        Self { face_heuristic }
    }

    pub fn normalize(&self, rich: &RichAnalysis) -> AnalysisResult {
        let subject_elements = rich
            .subjects
            .iter()
            .enumerate()
            .map(|(i, subject)| DetectedElement {
                label: short_label(&subject.description),
                importance: (i + 1) as u32,
                category: ElementCategory::Subject,
                description: subject.description.clone(),
            });

        let offset = rich.subjects.len();
        let background_elements = rich
            .background
            .key_elements
            .iter()
            .enumerate()
            .map(|(i, element)| DetectedElement {
                label: element.clone(),
                importance: (offset + i + 1) as u32,
                category: ElementCategory::Background,
                description: element.clone(),
            });

        let mut elements: Vec<DetectedElement> =
            subject_elements.chain(background_elements).collect();
        if elements.is_empty() {
            elements.push(DetectedElement {
                label: "scene".to_string(),
                importance: 1,
                category: ElementCategory::Subject,
                description: rich.background.description.clone(),
            });
        }

        let face_regions = rich
            .subjects
            .iter()
            .filter(|subject| self.face_heuristic.is_face(rich.photo_type, subject))
            .map(|subject| FaceRegion {
                description: subject.description.clone(),
                position: position_for_box(&subject.bounding_box),
                distinguishing_features: subject.distinctive_features.clone(),
            })
            .collect();

        AnalysisResult {
            elements,
            face_regions,
            scene_description: scene_description(rich),
            spatial_layout: spatial_layout(rich.photo_type),
            background_strategy: derive_background_strategy(
                rich.photo_type,
                rich.background.complexity,
            ),
        }
    }
}

impl Default for AnalysisNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

/// First three whitespace-separated words of a description.
fn short_label(description: &str) -> String {
    let label = description
        .split_whitespace()
        .take(3)
        .collect::<Vec<_>>()
        .join(" ");
    if label.is_empty() {
        "subject".to_string()
    } else {
        label
    }
}

/// Bucket a bounding box by its centre point.
pub fn position_for_box(bbox: &BoundingBox) -> FacePosition {
    position_for_center(bbox.x + bbox.width / 2.0, bbox.y + bbox.height / 2.0)
}

/// Boundary values 0.33 and 0.66 fall in the middle band.
pub fn position_for_center(x: f64, y: f64) -> FacePosition {
    let left = x < EDGE_LOW;
    let right = x > EDGE_HIGH;
    let top = y < EDGE_LOW;
    let bottom = y > EDGE_HIGH;

    match (top, bottom, left, right) {
        (true, _, true, _) => FacePosition::TopLeft,
        (true, _, _, true) => FacePosition::TopRight,
        (_, true, true, _) => FacePosition::BottomLeft,
        (_, true, _, true) => FacePosition::BottomRight,
        (_, _, true, _) => FacePosition::Left,
        (_, _, _, true) => FacePosition::Right,
        // A lone vertical bucket has no position of its own.
        _ => FacePosition::Center,
    }
}

/// Photo type wins over numeric complexity for landmarks and landscapes.
pub fn derive_background_strategy(photo_type: PhotoType, complexity: u8) -> BackgroundStrategy {
    match photo_type {
        PhotoType::Landmark => BackgroundStrategy::PreserveDetail,
        PhotoType::Landscape => BackgroundStrategy::PreserveStructure,
        _ => match complexity {
            0..=2 => BackgroundStrategy::Remove,
            3..=5 => BackgroundStrategy::Simplify,
            6..=8 => BackgroundStrategy::PreserveStructure,
            _ => BackgroundStrategy::PreserveDetail,
        },
    }
}

fn scene_description(rich: &RichAnalysis) -> String {
    if rich.subjects.is_empty() {
        return rich.background.description.clone();
    }
    let subjects = rich
        .subjects
        .iter()
        .map(|s| s.description.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "{}: {} with {}",
        rich.photo_type.as_str(),
        subjects,
        rich.background.description
    )
}

fn spatial_layout(photo_type: PhotoType) -> String {
    match photo_type {
        PhotoType::Portrait => "portrait close-up".to_string(),
        PhotoType::Group => "group scene".to_string(),
        PhotoType::Landscape => "landscape".to_string(),
        other => other.as_str().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subject(description: &str, x: f64, y: f64, features: &[&str]) -> Subject {
        Subject {
            description: description.to_string(),
            bounding_box: BoundingBox {
                x,
                y,
                width: 0.0,
                height: 0.0,
            },
            distinctive_features: features.iter().map(|f| f.to_string()).collect(),
        }
    }

    fn rich(photo_type: PhotoType, subjects: Vec<Subject>, key_elements: &[&str]) -> RichAnalysis {
        RichAnalysis {
            photo_type,
            subjects,
            background: Background {
                description: "a sunny beach".to_string(),
                complexity: 4,
                key_elements: key_elements.iter().map(|e| e.to_string()).collect(),
            },
            preservation_priorities: vec![],
            simplification_targets: vec![],
        }
    }

    #[test]
    fn empty_analysis_gets_scene_fallback() {
        let result = AnalysisNormalizer::new().normalize(&rich(PhotoType::Other, vec![], &[]));

        assert_eq!(result.elements.len(), 1);
        let element = &result.elements[0];
        assert_eq!(element.label, "scene");
        assert_eq!(element.category, ElementCategory::Subject);
        assert_eq!(element.importance, 1);
        assert_eq!(element.description, "a sunny beach");
        assert_eq!(result.scene_description, "a sunny beach");
        assert!(result.face_regions.is_empty());
    }

    #[test]
    fn subjects_rank_before_background_elements() {
        let analysis = rich(
            PhotoType::Pet,
            vec![
                subject("golden retriever puppy sitting happily", 0.5, 0.5, &[]),
                subject("red ball", 0.8, 0.8, &[]),
            ],
            &["palm tree", "umbrella"],
        );
        let result = AnalysisNormalizer::new().normalize(&analysis);

        let ranks: Vec<(String, u32, ElementCategory)> = result
            .elements
            .iter()
            .map(|e| (e.label.clone(), e.importance, e.category))
            .collect();
        assert_eq!(
            ranks,
            vec![
                ("golden retriever puppy".to_string(), 1, ElementCategory::Subject),
                ("red ball".to_string(), 2, ElementCategory::Subject),
                ("palm tree".to_string(), 3, ElementCategory::Background),
                ("umbrella".to_string(), 4, ElementCategory::Background),
            ]
        );
        assert_eq!(
            result.scene_description,
            "pet: golden retriever puppy sitting happily, red ball with a sunny beach"
        );
        assert_eq!(result.spatial_layout, "pet");
    }

    #[test]
    fn faces_need_features_and_person_context() {
        let analysis = rich(
            PhotoType::Other,
            vec![
                subject("Smiling WOMAN in a hat", 0.1, 0.1, &["wide smile"]),
                subject("man without listed features", 0.5, 0.5, &[]),
                subject("statue of a horse", 0.9, 0.9, &["broken ear"]),
            ],
            &[],
        );
        let result = AnalysisNormalizer::new().normalize(&analysis);

        assert_eq!(result.face_regions.len(), 1);
        assert_eq!(result.face_regions[0].description, "Smiling WOMAN in a hat");
        assert_eq!(result.face_regions[0].position, FacePosition::TopLeft);
        assert_eq!(
            result.face_regions[0].distinguishing_features,
            vec!["wide smile"]
        );
    }

    #[test]
    fn portrait_makes_any_featured_subject_a_face() {
        let analysis = rich(
            PhotoType::Portrait,
            vec![subject("toddler in a stroller", 0.5, 0.8, &["curly hair"])],
            &[],
        );
        let result = AnalysisNormalizer::new().normalize(&analysis);

        assert_eq!(result.face_regions.len(), 1);
        assert_eq!(result.face_regions[0].position, FacePosition::Center);
        assert_eq!(result.spatial_layout, "portrait close-up");
    }

    #[test]
    fn lexicon_misses_unlisted_people_in_other_photos() {
        let analysis = rich(
            PhotoType::Landmark,
            vec![subject("toddler in a stroller", 0.5, 0.5, &["curly hair"])],
            &[],
        );
        assert!(AnalysisNormalizer::new()
            .normalize(&analysis)
            .face_regions
            .is_empty());
    }

    #[test]
    fn heuristic_is_swappable() {
        struct Everyone;
        impl FaceHeuristic for Everyone {
            fn is_face(&self, _: PhotoType, _: &Subject) -> bool {
                true
            }
        }

        let analysis = rich(PhotoType::Pet, vec![subject("cat", 0.5, 0.5, &[])], &[]);
        let result = AnalysisNormalizer::with_heuristic(Box::new(Everyone)).normalize(&analysis);
        assert_eq!(result.face_regions.len(), 1);
    }

    #[test]
    fn position_uses_box_centre() {
        let bbox = BoundingBox {
            x: 0.6,
            y: 0.0,
            width: 0.4,
            height: 0.2,
        };
        assert_eq!(position_for_box(&bbox), FacePosition::TopRight);
    }

    #[test]
    fn position_boundaries_fall_in_middle_band() {
        assert_eq!(position_for_center(0.33, 0.5), FacePosition::Center);
        assert_eq!(position_for_center(0.34, 0.5), FacePosition::Center);
        assert_eq!(position_for_center(0.66, 0.5), FacePosition::Center);
        assert_eq!(position_for_center(0.329, 0.5), FacePosition::Left);
        assert_eq!(position_for_center(0.661, 0.5), FacePosition::Right);
        assert_eq!(position_for_center(0.0, 1.0), FacePosition::BottomLeft);
        assert_eq!(position_for_center(1.0, 1.0), FacePosition::BottomRight);
        assert_eq!(position_for_center(1.0, 0.0), FacePosition::TopRight);
    }

    #[test]
    fn position_is_total_over_unit_square() {
        let valid = [
            "center",
            "left",
            "right",
            "top-left",
            "top-right",
            "bottom-left",
            "bottom-right",
        ];
        for xi in 0..=20 {
            for yi in 0..=20 {
                let (x, y) = (xi as f64 / 20.0, yi as f64 / 20.0);
                let first = position_for_center(x, y);
                assert_eq!(first, position_for_center(x, y));
                assert!(valid.contains(&first.as_str()));
            }
        }
    }

    #[test]
    fn background_strategy_table() {
        use BackgroundStrategy::*;
        assert_eq!(derive_background_strategy(PhotoType::Landmark, 1), PreserveDetail);
        assert_eq!(derive_background_strategy(PhotoType::Other, 2), Remove);
        assert_eq!(derive_background_strategy(PhotoType::Other, 5), Simplify);
        assert_eq!(derive_background_strategy(PhotoType::Other, 8), PreserveStructure);
        assert_eq!(derive_background_strategy(PhotoType::Other, 10), PreserveDetail);
        assert_eq!(derive_background_strategy(PhotoType::Landscape, 1), PreserveStructure);
        assert_eq!(derive_background_strategy(PhotoType::Portrait, 3), Simplify);
    }

    #[test]
    fn blank_description_gets_generic_label() {
        let analysis = rich(PhotoType::Other, vec![subject("   ", 0.5, 0.5, &[])], &[]);
        let result = AnalysisNormalizer::new().normalize(&analysis);
        assert_eq!(result.elements[0].label, "subject");
    }
}
