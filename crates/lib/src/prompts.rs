//! # Prompt Templates
//!
//! Pure prompt constants and builder functions for every extraction task.
//! These carry the behavioral contract with the models: the structured
//! prompts demand JSON-only output, which the response parser and the
//! normalizer then enforce.

/// System prompt for one-sentence accessibility descriptions.
pub const ALT_SYSTEM: &str =
    "You describe images for accessibility. Be concise and strictly factual. Do not infer unseen details.";

/// Default word budget for alt text.
pub const DEFAULT_ALT_MAX_WORDS: usize = 20;

pub fn alt_user(max_words: usize) -> String {
    format!(
        "Describe this image in <= {max_words} words. Neutral tone. \
         No brand/species/location guesses. Return one sentence only. If unknown, omit."
    )
}

pub const CAPTION_SYSTEM: &str =
    "You carefully describe visual content without guessing. Mention salient text only if clearly readable.";

pub const CAPTION_USER: &str = "Write a factual, detailed caption (2-6 sentences) for this image. Cover:\n\
- Who/what is visible (counts if reliable).\n\
- Where/setting if visually indicated.\n\
- Salient readable text.\n\
- Relationships (e.g., 'person holding red umbrella near taxi').\n\
- Lighting/time cues if obvious (e.g., night, golden hour).\n\
If uncertain, say 'unclear'. Do not guess brands, species, or locations unless unmistakable. Avoid subjective adjectives.";

/// Fallback prompt for free-prompt captioning when the caller supplies none.
pub const DEFAULT_CAPTION_PROMPT: &str = "Write a concise, vivid caption for this image. \
Describe key subjects, scene, and mood in 1-2 sentences.";

/// System prompt for the combined alt-text + caption call.
pub const AC_SYSTEM: &str =
    "You describe images accurately and concisely without guessing. Return valid JSON only.";

pub const AC_USER: &str = "Return a JSON object with exactly two fields: \n\
{\n  \"alt_text\": string,\n  \"caption\": string\n}\n\n\
Constraints:\n\
- alt_text: one sentence, <= 20 words, strictly factual, neutral tone.\n\
- caption: 2-6 factual sentences, include what/where/relationships/lighting.\n\
- No brand/species/location guesses unless unmistakable. No subjective adjectives.";

/// System prompt for vision-grounded structured metadata extraction.
pub const STRUCTURED_SYSTEM: &str = "You extract only what is visibly supported by the image and caption. \
Do not guess. Use null or [] when unknown. Return valid JSON only.";

/// User prompt for vision-grounded structured metadata extraction.
pub fn structured_user(caption: &str) -> String {
    format!(
        "From this image and caption, return a compact JSON object with exactly these fields: \n\
media_type, objects, place, scene, lighting, style, palette, text, people, privacy, tags, notes.\n\n\
CAPTION: '{caption}'\n\n\
Rules:\n\
- media_type: one of photo | film_still | painting | illustration | render | screenshot | poster | document.\n\
- objects: 1-6 salient nouns.\n\
- place: null unless clearly evidenced by visible text or filename tokens.\n\
- scene: 1-3 tokens (e.g., indoor, corridor, street).\n\
- lighting: 1-3 tokens (e.g., soft, dramatic, night).\n\
- style: 1-5 aesthetic/genre tokens.\n\
- palette: 3-6 plain color words.\n\
- text: salient readable words only.\n\
- people: {{count, faces_visible}}.\n\
- privacy: only if applicable from content (faces_visible, license_plate_visible, nudity_or_racy, children_visible, sensitive_document).\n\
- tags: union of media_type + scene + lighting + style + palette + objects; deduplicate; <=20.\n\
- notes: short sentence only if strong evidence (e.g., 'Likely a film still').\n\
- Omit fields that would be empty or null, except always include media_type and people.\n\
Return JSON only."
    )
}

/// System prompt for text-only structured metadata extraction.
pub const STRUCTURED_TEXT_SYSTEM: &str = "You extract structured metadata from the caption only. Do not guess. \
Use null or [] when unknown. Return valid JSON only.";

/// User prompt for text-only structured metadata extraction.
pub fn structured_text_user(caption: &str) -> String {
    format!(
        "From the caption, return a compact JSON object with exactly these fields: \n\
media_type, objects, place, scene, lighting, style, palette, text, people, privacy, tags, notes.\n\n\
CAPTION: '{caption}'\n\n\
Rules:\n\
- media_type: one of photo | film_still | painting | illustration | render | screenshot | poster | document.\n\
- objects: 1-6 salient nouns.\n\
- place: null unless clearly evidenced by text or filename tokens.\n\
- scene: 1-3 tokens (e.g., indoor, corridor, street).\n\
- lighting: 1-3 tokens (e.g., soft, dramatic, night).\n\
- style: 1-5 aesthetic/genre tokens.\n\
- palette: 3-6 plain color words.\n\
- text: salient readable words only.\n\
- people: {{count, faces_visible}}.\n\
- privacy: only if applicable from content.\n\
- tags: union of media_type + scene + lighting + style + palette + objects; deduplicate; <=20.\n\
- notes: short sentence only if strong evidence (e.g., 'Likely a film still').\n\
- Omit fields that would be empty or null, except always include media_type and people.\n\
Return JSON only."
    )
}

/// Appends a free-text context block to a user prompt, newline-separated.
/// Empty or missing context leaves the prompt untouched.
pub fn with_context(prompt: &str, context: Option<&str>) -> String {
    match context {
        Some(ctx) if !ctx.trim().is_empty() => format!("{prompt}\n\n{ctx}"),
        _ => prompt.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alt_user_substitutes_word_budget() {
        assert!(alt_user(12).contains("<= 12 words"));
    }

    #[test]
    fn structured_user_embeds_caption() {
        let prompt = structured_user("A cat on a sofa.");
        assert!(prompt.contains("CAPTION: 'A cat on a sofa.'"));
        assert!(prompt.contains("media_type, objects, place, scene"));
    }

    #[test]
    fn with_context_appends_only_when_present() {
        assert_eq!(with_context("prompt", None), "prompt");
        assert_eq!(with_context("prompt", Some("  ")), "prompt");
        assert_eq!(
            with_context("prompt", Some("shot on a film set")),
            "prompt\n\nshot on a film set"
        );
    }
}
