use crate::studio::types::{CharacterDesign, CharacterStyle};

pub const DEFAULT_NEGATIVE_PROMPT: &str = "blurry, bad anatomy, bad hands, cropped, worst quality, low quality, text, watermark, logo, signature, extra fingers, mutated hands, poorly drawn hands, poorly drawn face, mutation, deformed, extra limbs, extra arms, missing arms, extra legs, missing legs, fused fingers, too many fingers";

pub const CONSISTENCY_SUFFIX: &str = "same person, consistent features";

/// Pose, angle and expression modifiers used to build the training set
/// around a chosen concept. Order matters: variations are generated in this
/// order and collection stops once the set is full.
pub const VARIATION_MODIFIERS: [&str; 9] = [
    "front view, neutral expression",
    "profile view, looking left",
    "profile view, looking right",
    "three-quarter view, soft smile",
    "close-up portrait, serious expression",
    "full body shot, standing pose",
    "upper body shot, looking over shoulder",
    "three-quarter view, laughing",
    "low angle shot, confident expression",
];

fn style_clause(style: CharacterStyle) -> &'static str {
    match style {
        CharacterStyle::Realistic => {
            "photorealistic portrait, natural lighting, detailed skin texture, professional photography"
        }
        CharacterStyle::Anime => {
            "high quality anime illustration, vibrant colors, expressive eyes, detailed linework"
        }
        CharacterStyle::Art => {
            "digital art, stylized character, creative interpretation, rich colors"
        }
    }
}

fn non_blank(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

fn join_tags(tags: &[String]) -> Option<String> {
    let joined = tags
        .iter()
        .filter_map(|tag| non_blank(tag))
        .collect::<Vec<_>>()
        .join(", ");
    if joined.is_empty() {
        None
    } else {
        Some(joined)
    }
}

/// Preset slugs like `long-black` read better as `long black`.
fn humanize(value: &str) -> String {
    value.replace(['-', '_'], " ")
}

pub fn build_prompt(design: &CharacterDesign) -> String {
    let mut clauses: Vec<String> = vec![style_clause(design.style).to_string()];

    if let Some(body) = non_blank(&design.body_type) {
        clauses.push(format!("{} body type", humanize(body)));
    }
    if let Some(features) = join_tags(&design.features) {
        clauses.push(features);
    }
    if let Some(hair) = non_blank(&design.hair_style) {
        clauses.push(format!("{} hair", humanize(hair)));
    }
    if let Some(distinctive) = join_tags(&design.distinctive_features) {
        clauses.push(distinctive);
    }
    if let Some(aesthetic) = non_blank(&design.aesthetic_style) {
        clauses.push(format!("{} aesthetic", humanize(aesthetic)));
    }

    let mut prompt = clauses.join(", ");
    if !design.custom_prompt.trim().is_empty() {
        prompt.push_str(", ");
        prompt.push_str(&design.custom_prompt);
    }
    prompt
}

/// Prompt for a named character: the name leads so the backend anchors on it.
pub fn named_prompt(name: &str, design: &CharacterDesign) -> String {
    let base = build_prompt(design);
    match non_blank(name) {
        Some(name) => format!("{name}, {base}"),
        None => base,
    }
}

pub fn variation_prompt(base: &str, modifier: &str) -> String {
    format!("{base}, {modifier}, {CONSISTENCY_SUFFIX}")
}
