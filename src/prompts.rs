//! Instruction prompts for the structuring model.
//!
//! Every prompt lives here so the JSON contract the parser in
//! [`crate::pipeline::parse`] relies on is written down in exactly one place.

/// Instruction sent as the system message of the structuring call.
///
/// `{min}` and `{max}` are replaced by [`structuring_instruction`].
pub const STRUCTURING_PROMPT: &str = r#"You are preparing a manuscript for an illustrated book.

Split the text the user sends into logical parts, in the original reading order.
Between the parts, insert descriptions of the illustrations that best fit that
moment of the story.

Return ONLY a JSON object in exactly this shape:
{
  "title": "Book title",
  "author": "Author",
  "content": [
    {"type": "text", "data": "A piece of the text..."},
    {"type": "image_prompt", "data": "A detailed description of what the picture for this moment should show..."},
    {"type": "text", "data": "The next piece of the text..."}
  ]
}

Rules:
- Make at least {min}-{max} illustrations for this book.
- "type" is either "text" or "image_prompt"; nothing else.
- Keep the text itself unchanged; keep its line breaks inside "data".
- Write the image_prompt descriptions in English for better image generation,
  whatever language the book is written in.
- Do not wrap the JSON in markdown fences and do not add commentary."#;

/// Render [`STRUCTURING_PROMPT`] for the requested illustration range.
pub fn structuring_instruction(min_illustrations: usize, max_illustrations: usize) -> String {
    STRUCTURING_PROMPT
        .replace("{min}", &min_illustrations.to_string())
        .replace("{max}", &max_illustrations.to_string())
}
