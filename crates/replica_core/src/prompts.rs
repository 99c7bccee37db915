//! Prompt construction for planner, worker and composition calls.

use replica_llm::{ContentPart, GenerationRequest, PromptMessage};

use crate::capture::{Capture, CaptureHints, Snapshot};
use crate::partition::{Partition, Role};

pub const WORKER_SYSTEM_PROMPT: &str = r#"You are an expert frontend engineer rebuilding a section of a website as Next.js 14 (app router) React components written in TypeScript and styled with Tailwind CSS.

Output format:
- Emit every file as a block that starts with a line `=== FILE: <relative path> ===` followed by the file content.
- Components go in `components/<Name>.tsx`, one default-exported component per file, PascalCase names.
- If you need npm packages beyond react, next and lucide-react, add a final line `=== DEPENDENCIES: pkg-a, pkg-b ===`.
- Never write `app/page.tsx`, `app/layout.tsx` or configuration files.
- No explanations, no markdown outside the file blocks.

Fidelity:
- Reproduce layout, spacing, colours, typography and copy exactly as shown.
- Use plain <img> tags with the original image URLs where provided.
- Add "use client" to components that use hooks or event handlers."#;

pub const PLANNER_SYSTEM_PROMPT: &str = r#"You split a long web page into sections for several engineers working in parallel. Each engineer rebuilds a contiguous vertical band of the page. Assign React component names so that no two engineers build the same thing.

Answer with JSON only: an object mapping the 1-based engineer number to an ordered array of PascalCase component names, for example {"1": ["Navbar", "Hero"], "2": ["Features"]}."#;

pub const COMPOSE_SYSTEM_PROMPT: &str = r#"You assemble the main page of a Next.js 14 app from existing components.

Write exactly one file, `app/page.tsx`, as a block starting with `=== FILE: app/page.tsx ===`.
- Import every listed component exactly once with `import Name from "@/components/Name";` and render each once, top to bottom in page order.
- Do not import anything else from `@/`, and do not define new sections.
- Pick the outer layout (stacked, sidebar or grid) that matches the screenshots, using Tailwind classes on wrapper elements only."#;

/// Render the hint block shared by worker and compose prompts.
pub fn describe_hints(hints: &CaptureHints) -> String {
    let mut lines = Vec::new();
    if let Some(title) = &hints.title {
        lines.push(format!("Page title: {}", title));
    }
    if !hints.palette.is_empty() {
        lines.push(format!("Colour palette: {}", hints.palette.join(", ")));
    }
    if !hints.fonts.is_empty() {
        lines.push(format!("Fonts: {}", hints.fonts.join(", ")));
    }
    if let Some(icons) = &hints.icon_library {
        lines.push(format!("Icons: {} (use lucide-react equivalents)", icons));
    }
    if !hints.logos.is_empty() {
        lines.push(format!("Logos: {}", hints.logos.join(", ")));
    }
    if !hints.interactions.is_empty() {
        lines.push("Interactive elements:".to_string());
        lines.extend(hints.interactions.iter().map(|i| format!("- {}", i)));
    }
    if !hints.images.is_empty() {
        lines.push("Image URLs:".to_string());
        lines.extend(hints.images.iter().take(40).map(|i| format!("- {}", i)));
    }
    if !hints.links.is_empty() {
        lines.push(format!(
            "Links: {}",
            hints.links.iter().take(40).cloned().collect::<Vec<_>>().join(", ")
        ));
    }
    lines.join("\n")
}

fn with_snapshots<'a>(mut message: PromptMessage, snapshots: impl IntoIterator<Item = &'a Snapshot>) -> PromptMessage {
    for snapshot in snapshots {
        message = message.with_part(ContentPart::png(snapshot.data.clone()));
    }
    message
}

fn role_instructions(role: Role) -> &'static str {
    match role {
        Role::Solo => "You own the whole page, including the top navigation/header and the footer.",
        Role::First => "You own the top of the page, including the navigation/header. Do not build a footer.",
        Role::Middle => "You own a middle band of the page. Do not build navigation, header or footer components.",
        Role::Last => "You own the bottom of the page, including the footer. Do not build navigation or header components.",
    }
}

/// Request for one worker.
pub fn worker_request(
    capture: &Capture,
    partition: &Partition,
    planned: &[String],
    max_tokens: u32,
) -> GenerationRequest {
    let snapshots = partition.snapshots(capture);
    let core = &partition.core;

    let mut text = format!(
        "Website: {}\nYou are engineer {} of {}. {}\n\n",
        capture.url,
        partition.number(),
        partition.workers,
        role_instructions(partition.role)
    );
    text.push_str(&format!(
        "You receive {} screenshot(s) in page order. Build only what appears in screenshot(s) {} to {}.",
        snapshots.len(),
        core.start + 1,
        core.end
    ));
    if partition.has_overlap_before() {
        text.push_str(" The first screenshot belongs to the previous engineer and is context only.");
    }
    if partition.has_overlap_after() {
        text.push_str(" The last screenshot belongs to the next engineer and is context only.");
    }
    text.push('\n');
    if !planned.is_empty() {
        text.push_str(&format!(
            "\nBuild these components, in this order: {}. Use exactly these names.\n",
            planned.join(", ")
        ));
    }
    let hints = describe_hints(&capture.hints);
    if !hints.is_empty() {
        text.push('\n');
        text.push_str(&hints);
        text.push('\n');
    }

    GenerationRequest::new(partition.label())
        .message(PromptMessage::system(WORKER_SYSTEM_PROMPT))
        .message(with_snapshots(PromptMessage::user(text), snapshots))
        .max_tokens(max_tokens)
}

/// Request for the ownership planner.
pub fn planner_request(capture: &Capture, workers: usize, sample: usize) -> GenerationRequest {
    let sampled = capture.sample(sample);
    let text = format!(
        "Website: {}\nThe page is {} px tall and split top to bottom into {} equal bands, one per engineer. The {} screenshot(s) below are evenly spaced samples of the page in order.\nReturn the component names for engineers 1 to {}.",
        capture.url, capture.total_height, workers, sampled.len(), workers
    );
    GenerationRequest::new("planner")
        .message(PromptMessage::system(PLANNER_SYSTEM_PROMPT))
        .message(with_snapshots(PromptMessage::user(text), sampled))
        .max_tokens(1_000)
}

/// Request for the composition call. `manifest` lists component names in
/// page order, grouped by worker.
pub fn compose_request(capture: &Capture, manifest: &[Vec<String>], sample: usize, max_tokens: u32) -> GenerationRequest {
    let sampled = capture.sample(sample);
    let mut text = format!("Website: {}\nComponents, top to bottom:\n", capture.url);
    for (index, names) in manifest.iter().enumerate() {
        if names.is_empty() {
            continue;
        }
        text.push_str(&format!("Band {}: {}\n", index + 1, names.join(", ")));
    }
    let hints = describe_hints(&CaptureHints {
        palette: capture.hints.palette.clone(),
        fonts: capture.hints.fonts.clone(),
        ..Default::default()
    });
    if !hints.is_empty() {
        text.push('\n');
        text.push_str(&hints);
        text.push('\n');
    }
    GenerationRequest::new("compose")
        .message(PromptMessage::system(COMPOSE_SYSTEM_PROMPT))
        .message(with_snapshots(PromptMessage::user(text), sampled))
        .max_tokens(max_tokens)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::Snapshot;
    use crate::partition::partition;

    fn capture(n: usize) -> Capture {
        Capture::new(
            "https://example.com",
            (0..n).map(|i| Snapshot::new(format!("img{}", i), i as u32 * 720)).collect(),
        )
    }

    #[test]
    fn test_worker_request_carries_slice_images() {
        let capture = capture(7);
        let parts = partition(7, 1, 5);
        let request = worker_request(&capture, &parts[1], &["Features".to_string()], 16_000);

        assert_eq!(request.label, "worker-2");
        let user = &request.messages[1];
        assert_eq!(user.image_count(), 4);
        let text = user.text();
        assert!(text.contains("engineer 2 of 5"));
        assert!(text.contains("screenshot(s) 2 to 3"));
        assert!(text.contains("previous engineer"));
        assert!(text.contains("Features"));
    }

    #[test]
    fn test_planner_request_samples() {
        let request = planner_request(&capture(10), 5, 4);
        assert_eq!(request.messages[1].image_count(), 4);
        assert!(request.messages[1].text().contains("engineers 1 to 5"));
    }

    #[test]
    fn test_compose_request_lists_bands() {
        let manifest = vec![vec!["Navbar".to_string(), "Hero".to_string()], vec![], vec!["Footer".to_string()]];
        let request = compose_request(&capture(3), &manifest, 3, 4_000);
        let text = request.messages[1].text();
        assert!(text.contains("Band 1: Navbar, Hero"));
        assert!(!text.contains("Band 2"));
        assert!(text.contains("Band 3: Footer"));
    }
}
