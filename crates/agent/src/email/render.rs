use std::collections::HashMap;

use pulldown_cmark::{html, CowStr, Event, Options, Parser, Tag, TagEnd};

const TOC_MARKER: &str = "[TOC]";

fn options() -> Options {
    Options::ENABLE_TABLES
        | Options::ENABLE_FOOTNOTES
        | Options::ENABLE_STRIKETHROUGH
        | Options::ENABLE_SMART_PUNCTUATION
        | Options::ENABLE_HEADING_ATTRIBUTES
        | Options::ENABLE_GFM
        | Options::ENABLE_DEFINITION_LIST
        | Options::ENABLE_WIKILINKS
}

struct HeadingEntry {
    level: usize,
    id: String,
    text: String,
}

/// Renders an email body written in markdown to HTML. Soft line breaks
/// become `<br />`, headings get anchor ids, and a paragraph holding only
/// `[TOC]` is replaced by a nested table of contents.
pub fn render_markdown(markdown: &str) -> String {
    let mut events: Vec<Event<'_>> = Parser::new_ext(markdown, options()).collect();
    let headings = assign_heading_ids(&mut events);
    let toc = render_toc(&headings);

    let mut output = Vec::with_capacity(events.len());
    let mut index = 0;
    while index < events.len() {
        if let Some(consumed) = toc_paragraph_len(&events[index..]) {
            output.push(Event::Html(CowStr::from(toc.clone())));
            index += consumed;
            continue;
        }

        output.push(match &events[index] {
            Event::SoftBreak => Event::HardBreak,
            other => other.clone(),
        });
        index += 1;
    }

    let mut rendered = String::with_capacity(markdown.len() * 2);
    html::push_html(&mut rendered, output.into_iter());
    rendered
}

fn assign_heading_ids(events: &mut [Event<'_>]) -> Vec<HeadingEntry> {
    let mut used: HashMap<String, usize> = HashMap::new();
    let mut headings = Vec::new();
    let mut index = 0;

    while index < events.len() {
        if !matches!(events[index], Event::Start(Tag::Heading { .. })) {
            index += 1;
            continue;
        }

        let mut text = String::new();
        let mut cursor = index + 1;
        while cursor < events.len() {
            match &events[cursor] {
                Event::End(TagEnd::Heading(_)) => break,
                Event::Text(fragment) | Event::Code(fragment) => text.push_str(fragment),
                _ => {}
            }
            cursor += 1;
        }

        if let Event::Start(Tag::Heading { level, id, .. }) = &mut events[index] {
            let assigned = match id {
                Some(existing) => existing.to_string(),
                None => {
                    let slug = unique_slug(&text, &mut used);
                    *id = Some(CowStr::from(slug.clone()));
                    slug
                }
            };
            headings.push(HeadingEntry { level: *level as usize, id: assigned, text });
        }

        index = cursor + 1;
    }

    headings
}

fn unique_slug(text: &str, used: &mut HashMap<String, usize>) -> String {
    let mut slug = String::with_capacity(text.len());
    for ch in text.trim().to_lowercase().chars() {
        if ch.is_alphanumeric() || ch == '_' {
            slug.push(ch);
        } else if (ch.is_whitespace() || ch == '-') && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let mut slug = slug.trim_matches('-').to_string();
    if slug.is_empty() {
        slug = "section".to_string();
    }

    let count = used.entry(slug.clone()).or_insert(0);
    let unique = if *count == 0 { slug } else { format!("{slug}_{count}") };
    *count += 1;
    unique
}

fn toc_paragraph_len(events: &[Event<'_>]) -> Option<usize> {
    if !matches!(events.first(), Some(Event::Start(Tag::Paragraph))) {
        return None;
    }

    let mut text = String::new();
    for (offset, event) in events.iter().enumerate().skip(1) {
        match event {
            Event::Text(fragment) => text.push_str(fragment),
            Event::End(TagEnd::Paragraph) => {
                return (text.trim() == TOC_MARKER).then_some(offset + 1);
            }
            _ => return None,
        }
    }
    None
}

fn render_toc(headings: &[HeadingEntry]) -> String {
    let mut toc = String::from("<div class=\"toc\">\n");
    let mut levels: Vec<usize> = Vec::new();

    for heading in headings {
        if levels.last().map_or(true, |top| heading.level > *top) {
            toc.push_str("<ul>\n");
            levels.push(heading.level);
        } else {
            toc.push_str("</li>\n");
            while levels.len() > 1 && levels.last().map_or(false, |top| heading.level < *top) {
                levels.pop();
                toc.push_str("</ul>\n</li>\n");
            }
        }
        toc.push_str(&format!(
            "<li><a href=\"#{}\">{}</a>",
            escape_text(&heading.id),
            escape_text(&heading.text)
        ));
    }

    for _ in &levels {
        toc.push_str("</li>\n</ul>\n");
    }
    toc.push_str("</div>\n");
    toc
}

fn escape_text(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            other => escaped.push(other),
        }
    }
    escaped
}
