//! Prompts for vision-model plumbing takeoff.
//!
//! Callers can override the system prompt via
//! [`crate::config::TakeoffConfig::system_prompt`]; the constant here is used
//! only when no override is provided. The per-page user message is always
//! built by [`page_context_message`].

/// Default system prompt for extracting plumbing line items from one sheet.
///
/// The JSON schema below is what downstream estimating tools consume; field
/// names must not change without updating them.
pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You are an estimator specialising in plumbing work packages from construction submittal drawings. You will receive a high-resolution image of one drawing sheet together with text extracted from the same sheet. Extract structured data for every plumbing-related item (pipes, fittings, valves, fixtures, drains, vents, risers) that is shown or described.

Return strictly valid JSON using this schema:
{
  "page": <page number>,
  "plumbing_items": [
    {
      "item_type": "<specific item type: pipe, fitting, valve, fixture, ...>",
      "quantity": "<exact numeric quantity>",
      "model_or_spec": "<manufacturer model, part number or specification tag, if any>",
      "dimensions": "<pipe size, diameter, BE height, length, ...>",
      "mounting_type": "<wall-hung, ceiling-mounted, floor-mounted, vertical riser, ...>",
      "confidence": "<score between 0.0 (low) and 1.0 (high)>",
      "notes": "<short note when confidence is below 0.7 or clarification is needed; otherwise 'N/A'>"
    }
  ]
}

Rules:
- Only plumbing items. Ignore other trades unless an item is explicitly tied to the plumbing scope.
- Quantities are exact numbers, never words like "multiple". When you must estimate, give your best number and say so in notes.
- Copy specification tags exactly (e.g. HUH-9, OM-135, HHWR, HHWS, CWR), even when only partly legible.
- Read dimensions (diameter Ø, length, BE heights) from callouts, schedules and tables.
- Infer the mounting type from labels or visual cues.
- Score confidence per item from the combined evidence of image and text.
- Add notes only when confidence is below 0.7 or something is ambiguous.

The output feeds material estimation and fabrication, so accuracy matters more than coverage. Respond with the JSON object only."#;

/// Build the user message that accompanies the page image.
pub fn page_context_message(page_number: u32, context_text: &str) -> String {
    format!(
        "Below is the contextual text extracted from page {page_number} of the plumbing drawing:\n\n\
         {context_text}\n\n\
         Please analyze this text alongside the attached high-resolution image."
    )
}
