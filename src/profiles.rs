// src/profiles.rs
//! Static per-tier settings for line weight, detail and inference parameters.

use crate::models::{ComplexityLevel, InferenceConfig};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ComplexityProfile {
    pub line_weight: &'static str,
    pub detail_level: &'static str,
    pub region_size_guidance: &'static str,
    pub age_description: &'static str,
    pub extra_instructions: &'static str,
    pub inference_steps: u32,
    pub guidance_scale: f32,
}

const TODDLER: ComplexityProfile = ComplexityProfile {
    line_weight: "very thick, bold outlines (about 5px)",
    detail_level: "minimal detail with only the most essential shapes",
    region_size_guidance: "Keep every region very large and easy to color with chunky crayons; aim for no more than 15 regions in total.",
    age_description: "toddlers aged 2 to 4",
    extra_instructions: "Omit small features entirely and use simple rounded shapes.",
    inference_steps: 20,
    guidance_scale: 8.0,
};

const CHILD: ComplexityProfile = ComplexityProfile {
    line_weight: "thick, confident outlines (about 3-4px)",
    detail_level: "low detail with clear, recognizable shapes",
    region_size_guidance: "Keep regions large enough for markers; aim for roughly 20 to 40 regions.",
    age_description: "children aged 5 to 8",
    extra_instructions: "Include a few fun details but avoid tiny enclosed areas.",
    inference_steps: 25,
    guidance_scale: 7.5,
};

const TWEEN: ComplexityProfile = ComplexityProfile {
    line_weight: "medium outlines (about 2-3px)",
    detail_level: "moderate detail including textures suggested by line",
    region_size_guidance: "Regions may be medium sized for colored pencils; roughly 40 to 80 regions is appropriate.",
    age_description: "pre-teens aged 9 to 12",
    extra_instructions: "Hair, clothing folds and patterns may be outlined as separate regions.",
    inference_steps: 30,
    guidance_scale: 7.5,
};

const ADULT: ComplexityProfile = ComplexityProfile {
    line_weight: "fine, precise outlines (about 1-2px)",
    detail_level: "high detail with intricate patterns",
    region_size_guidance: "Small regions are welcome for fine-tipped pens; more than 80 regions is fine.",
    age_description: "teens and adults",
    extra_instructions: "Decorative patterns may fill larger areas as long as every region stays enclosed.",
    inference_steps: 35,
    guidance_scale: 7.0,
};

pub fn profile(level: ComplexityLevel) -> &'static ComplexityProfile {
    match level {
        ComplexityLevel::Toddler => &TODDLER,
        ComplexityLevel::Child => &CHILD,
        ComplexityLevel::Tween => &TWEEN,
        ComplexityLevel::Adult => &ADULT,
    }
}

/// More detail takes more steps but looser prompt adherence.
pub fn inference_config(level: ComplexityLevel) -> InferenceConfig {
    let profile = profile(level);
    InferenceConfig {
        num_inference_steps: profile.inference_steps,
        guidance_scale: profile.guidance_scale,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inference_steps_increase_and_guidance_relaxes() {
        let configs: Vec<InferenceConfig> = ComplexityLevel::ALL
            .into_iter()
            .map(inference_config)
            .collect();

        assert_eq!(configs.first().unwrap().num_inference_steps, 20);
        assert_eq!(configs.last().unwrap().num_inference_steps, 35);
        assert_eq!(configs.first().unwrap().guidance_scale, 8.0);
        assert_eq!(configs.last().unwrap().guidance_scale, 7.0);

        for pair in configs.windows(2) {
            assert!(pair[0].num_inference_steps < pair[1].num_inference_steps);
            assert!(pair[0].guidance_scale >= pair[1].guidance_scale);
        }
    }

    #[test]
    fn every_level_has_a_profile() {
        for level in ComplexityLevel::ALL {
            let p = profile(level);
            assert!(!p.line_weight.is_empty());
            assert!(!p.age_description.is_empty());
        }
    }
}
