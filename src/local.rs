//! Offline page synthesis: the last tier, and the default when no backend
//! is configured. Pure and deterministic for a given prompt.

use crate::preview::escape_html;
use crate::transport::{ChatMessage, GenerationResult};

const MAX_TITLE_CHARS: usize = 60;

/// Keywords found in a prompt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Intents {
    pub dark: bool,
    pub landing: bool,
    pub pricing: bool,
    pub portfolio: bool,
    pub blog: bool,
    pub contact: bool,
}

impl Intents {
    pub fn detect(prompt: &str) -> Self {
        let p = prompt.to_lowercase();
        let any = |words: &[&str]| words.iter().any(|w| p.contains(w));
        Self {
            dark: any(&["dark", "night", "black"]),
            landing: any(&["landing", "saas", "startup", "product"]),
            pricing: any(&["pricing", "plans", "tiers"]),
            portfolio: any(&["portfolio", "gallery", "showcase"]),
            blog: any(&["blog", "article", "posts"]),
            contact: any(&["contact", "get in touch", "email"]),
        }
    }
}

/// Page title: the prompt with whitespace collapsed, capped at 60 characters.
pub fn title_from_prompt(prompt: &str) -> String {
    let collapsed = prompt.split_whitespace().collect::<Vec<_>>().join(" ");
    let title: String = collapsed.chars().take(MAX_TITLE_CHARS).collect();
    let title = title.trim_end().to_string();
    if title.is_empty() {
        "Untitled site".to_string()
    } else {
        title
    }
}

/// A page split into the pieces that are streamed one at a time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalPage {
    pub head: String,
    pub sections: Vec<String>,
    pub foot: String,
}

struct Palette {
    bg: &'static str,
    surface: &'static str,
    text: &'static str,
    muted: &'static str,
    accent: &'static str,
}

const LIGHT: Palette = Palette {
    bg: "#ffffff",
    surface: "#f3f4f6",
    text: "#111827",
    muted: "#4b5563",
    accent: "#2563eb",
};

const DARK: Palette = Palette {
    bg: "#0b1020",
    surface: "#151b2e",
    text: "#e5e7eb",
    muted: "#9ca3af",
    accent: "#6366f1",
};

impl LocalPage {
    pub fn compose(prompt: &str) -> Self {
        let intents = Intents::detect(prompt);
        let title = escape_html(&title_from_prompt(prompt));
        let palette = if intents.dark { &DARK } else { &LIGHT };

        let mut sections = vec![hero(&title, intents.landing)];
        if intents.landing {
            sections.push(features());
        }
        if intents.pricing {
            sections.push(pricing());
        }
        if intents.portfolio {
            sections.push(portfolio());
        }
        if intents.blog {
            sections.push(blog());
        }
        if intents.landing {
            sections.push(call_to_action());
        }
        if intents.contact {
            sections.push(contact());
        }
        if sections.len() == 1 {
            sections.push(about());
        }

        Self {
            head: head(&title, palette),
            sections,
            foot: foot(&title),
        }
    }

    pub fn render(&self) -> String {
        let mut html = self.head.clone();
        for section in &self.sections {
            html.push_str(section);
        }
        html.push_str(&self.foot);
        html
    }
}

/// Build a complete page for `prompt` without any network access.
pub fn local_generate(prompt: &str) -> GenerationResult {
    let page = LocalPage::compose(prompt);
    let content = format!(
        "Generated a {}-section preview locally.",
        page.sections.len()
    );
    GenerationResult {
        html: page.render(),
        messages: Some(vec![
            ChatMessage::user(prompt.trim()),
            ChatMessage::assistant(content.clone()),
        ]),
        content,
    }
}

fn head(title: &str, p: &Palette) -> String {
    format!(
        r##"<!doctype html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>{title}</title>
<style>
:root{{--bg:{bg};--surface:{surface};--text:{text};--muted:{muted};--accent:{accent}}}
*{{box-sizing:border-box}}
body{{margin:0;font-family:system-ui,sans-serif;background:var(--bg);color:var(--text);line-height:1.6}}
header,section,footer{{padding:48px 24px;max-width:1080px;margin:0 auto}}
nav{{display:flex;justify-content:space-between;align-items:center;padding:16px 24px}}
.grid{{display:grid;grid-template-columns:repeat(auto-fit,minmax(220px,1fr));gap:20px}}
.card{{background:var(--surface);border-radius:12px;padding:20px}}
.muted{{color:var(--muted)}}
.button{{display:inline-block;background:var(--accent);color:#fff;padding:12px 20px;border-radius:8px;text-decoration:none;border:0}}
input,textarea{{width:100%;padding:10px;border-radius:8px;border:1px solid var(--muted);background:var(--surface);color:var(--text)}}
</style>
</head>
<body>
<nav><strong>{title}</strong><a class="button" href="#main">Get started</a></nav>
<main id="main">
"##,
        bg = p.bg,
        surface = p.surface,
        text = p.text,
        muted = p.muted,
        accent = p.accent,
    )
}

fn hero(title: &str, landing: bool) -> String {
    let tagline = if landing {
        "Everything your team needs, in one place."
    } else {
        "A fresh page, generated from your description."
    };
    format!(
        r#"<header id="hero">
<h1>{title}</h1>
<p class="muted">{tagline}</p>
</header>
"#
    )
}

fn features() -> String {
    r#"<section id="features">
<h2>Features</h2>
<div class="grid">
<div class="card"><h3>Fast setup</h3><p class="muted">Go from idea to live page in minutes.</p></div>
<div class="card"><h3>Secure by default</h3><p class="muted">Sensible defaults that keep your data safe.</p></div>
<div class="card"><h3>Scales with you</h3><p class="muted">From the first user to the millionth.</p></div>
</div>
</section>
"#
    .to_string()
}

fn pricing() -> String {
    r#"<section id="pricing">
<h2>Pricing</h2>
<div class="grid">
<div class="card"><h3>Starter</h3><p><strong>$0</strong> / month</p><p class="muted">For side projects.</p></div>
<div class="card"><h3>Team</h3><p><strong>$29</strong> / month</p><p class="muted">For growing teams.</p></div>
<div class="card"><h3>Enterprise</h3><p><strong>Custom</strong></p><p class="muted">For large organisations.</p></div>
</div>
</section>
"#
    .to_string()
}

fn portfolio() -> String {
    r#"<section id="portfolio">
<h2>Selected work</h2>
<div class="grid">
<div class="card"><h3>Project one</h3><p class="muted">Brand identity and web design.</p></div>
<div class="card"><h3>Project two</h3><p class="muted">Mobile app for a local business.</p></div>
<div class="card"><h3>Project three</h3><p class="muted">Data dashboard and reporting.</p></div>
</div>
</section>
"#
    .to_string()
}

fn blog() -> String {
    r#"<section id="blog">
<h2>Latest posts</h2>
<article class="card"><h3>Getting started</h3><p class="muted">What we learned shipping our first version.</p></article>
<article class="card"><h3>Design notes</h3><p class="muted">How we choose colours, type and spacing.</p></article>
</section>
"#
    .to_string()
}

fn call_to_action() -> String {
    r##"<section id="cta" class="card">
<h2>Ready to get started?</h2>
<p class="muted">Join the teams already building with us.</p>
<a class="button" href="#contact">Start free trial</a>
</section>
"##
    .to_string()
}

fn contact() -> String {
    r#"<section id="contact">
<h2>Contact</h2>
<form class="contact-form">
<p><label>Name<input type="text" name="name"></label></p>
<p><label>Email<input type="email" name="email"></label></p>
<p><label>Message<textarea name="message" rows="4"></textarea></label></p>
<button class="button" type="button">Send</button>
</form>
</section>
"#
    .to_string()
}

fn about() -> String {
    r#"<section id="about">
<h2>About</h2>
<p class="muted">Describe a landing page, portfolio, blog, pricing or contact section to shape this preview.</p>
</section>
"#
    .to_string()
}

fn foot(title: &str) -> String {
    format!(
        r#"</main>
<footer><p class="muted">&copy; {title}</p></footer>
</body>
</html>
"#
    )
}
