//! CSS selector subset for the in-memory DOM.
//!
//! Supported: type and universal selectors, `#id`, `.class`, attribute
//! selectors `[a]`, `[a=v]`, `[a^=v]`, `[a$=v]`, `[a*=v]`, descendant and
//! child combinators, and comma-separated lists. Anything else is rejected
//! so a test never silently matches the wrong node.

/// Read access to a node tree, indexed by node id
pub trait Dom {
    /// Lowercase tag name
    fn tag(&self, node: usize) -> &str;
    /// Attribute value
    fn attribute(&self, node: usize, name: &str) -> Option<&str>;
    /// Parent node
    fn parent(&self, node: usize) -> Option<usize>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum AttrOp {
    Exists,
    Equals(String),
    Prefix(String),
    Suffix(String),
    Contains(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct AttrMatch {
    name: String,
    op: AttrOp,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Compound {
    tag: Option<String>,
    id: Option<String>,
    classes: Vec<String>,
    attrs: Vec<AttrMatch>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Combinator {
    Descendant,
    Child,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Complex {
    // parts[i].0 links parts[i] to parts[i - 1]; ignored for i == 0
    parts: Vec<(Combinator, Compound)>,
}

/// A parsed selector list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CssSelector {
    alternatives: Vec<Complex>,
}

impl CssSelector {
    /// Parse a selector list.
    pub fn parse(input: &str) -> Result<Self, String> {
        let mut alternatives = Vec::new();
        for piece in split_top_level(input)? {
            alternatives.push(parse_complex(piece)?);
        }
        if alternatives.is_empty() {
            return Err("empty selector".to_string());
        }
        Ok(Self { alternatives })
    }

    /// Whether `node` matches any alternative.
    pub fn matches<D: Dom + ?Sized>(&self, dom: &D, node: usize) -> bool {
        self.alternatives
            .iter()
            .any(|c| match_from(dom, &c.parts, c.parts.len() - 1, node))
    }
}

fn split_top_level(input: &str) -> Result<Vec<&str>, String> {
    let mut pieces = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut start = 0;
    for (i, c) in input.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(c),
            (None, '[') => depth += 1,
            (None, ']') => depth = depth.saturating_sub(1),
            (None, ',') if depth == 0 => {
                pieces.push(input[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    if quote.is_some() || depth != 0 {
        return Err(format!("unbalanced selector: {input}"));
    }
    pieces.push(input[start..].trim());
    if pieces.iter().any(|p| p.is_empty()) {
        return Err(format!("empty selector in list: {input}"));
    }
    Ok(pieces)
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

struct Cursor<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
}

impl Cursor<'_> {
    fn ident(&mut self) -> Result<String, String> {
        let mut out = String::new();
        while let Some(&c) = self.chars.peek() {
            if !is_ident_char(c) {
                break;
            }
            out.push(c);
            self.chars.next();
        }
        if out.is_empty() {
            Err("expected identifier".to_string())
        } else {
            Ok(out)
        }
    }

    fn skip_ws(&mut self) -> bool {
        let mut skipped = false;
        while matches!(self.chars.peek(), Some(c) if c.is_whitespace()) {
            self.chars.next();
            skipped = true;
        }
        skipped
    }

    fn attr(&mut self) -> Result<AttrMatch, String> {
        self.skip_ws();
        let name = self.ident()?;
        self.skip_ws();
        let op = match self.chars.next() {
            Some(']') => {
                return Ok(AttrMatch {
                    name,
                    op: AttrOp::Exists,
                })
            }
            Some('=') => '=',
            Some(c @ ('^' | '$' | '*')) => {
                if self.chars.next() != Some('=') {
                    return Err(format!("expected `=` after `{c}`"));
                }
                c
            }
            other => return Err(format!("unexpected {other:?} in attribute selector")),
        };
        self.skip_ws();
        let value = match self.chars.peek() {
            Some(&q @ ('"' | '\'')) => {
                self.chars.next();
                let mut v = String::new();
                loop {
                    match self.chars.next() {
                        Some(c) if c == q => break,
                        Some(c) => v.push(c),
                        None => return Err("unterminated string".to_string()),
                    }
                }
                v
            }
            _ => self.ident()?,
        };
        self.skip_ws();
        if self.chars.next() != Some(']') {
            return Err("expected `]`".to_string());
        }
        let op = match op {
            '=' => AttrOp::Equals(value),
            '^' => AttrOp::Prefix(value),
            '$' => AttrOp::Suffix(value),
            _ => AttrOp::Contains(value),
        };
        Ok(AttrMatch { name, op })
    }

    fn compound(&mut self) -> Result<Option<Compound>, String> {
        let mut compound = Compound::default();
        let mut universal = false;
        match self.chars.peek() {
            Some('*') => {
                self.chars.next();
                universal = true;
            }
            Some(&c) if is_ident_char(c) => compound.tag = Some(self.ident()?.to_ascii_lowercase()),
            _ => {}
        }
        loop {
            match self.chars.peek() {
                Some('#') => {
                    self.chars.next();
                    compound.id = Some(self.ident()?);
                }
                Some('.') => {
                    self.chars.next();
                    compound.classes.push(self.ident()?);
                }
                Some('[') => {
                    self.chars.next();
                    compound.attrs.push(self.attr()?);
                }
                _ => break,
            }
        }
        if compound == Compound::default() && !universal {
            return Ok(None);
        }
        Ok(Some(compound))
    }
}

fn parse_complex(input: &str) -> Result<Complex, String> {
    let mut cursor = Cursor {
        chars: input.chars().peekable(),
    };
    let mut parts = Vec::new();
    let mut combinator = Combinator::Descendant;
    loop {
        let had_ws = cursor.skip_ws();
        match cursor.chars.peek() {
            None => break,
            Some('>') => {
                cursor.chars.next();
                combinator = Combinator::Child;
                continue;
            }
            Some(_) => {
                if !parts.is_empty() && !had_ws && combinator == Combinator::Descendant {
                    let rest: String = cursor.chars.clone().collect();
                    return Err(format!("unsupported selector syntax near `{rest}`"));
                }
            }
        }
        let Some(compound) = cursor.compound()? else {
            let rest: String = cursor.chars.clone().collect();
            return Err(format!("unsupported selector syntax near `{rest}`"));
        };
        parts.push((combinator, compound));
        combinator = Combinator::Descendant;
    }
    if parts.is_empty() {
        return Err("empty selector".to_string());
    }
    Ok(Complex { parts })
}

fn compound_matches<D: Dom + ?Sized>(dom: &D, compound: &Compound, node: usize) -> bool {
    if let Some(tag) = &compound.tag {
        if dom.tag(node) != tag {
            return false;
        }
    }
    if let Some(id) = &compound.id {
        if dom.attribute(node, "id") != Some(id.as_str()) {
            return false;
        }
    }
    if !compound.classes.is_empty() {
        let classes = dom.attribute(node, "class").unwrap_or("");
        if !compound
            .classes
            .iter()
            .all(|c| classes.split_whitespace().any(|have| have == c))
        {
            return false;
        }
    }
    compound.attrs.iter().all(|a| {
        let value = dom.attribute(node, &a.name);
        match (&a.op, value) {
            (_, None) => false,
            (AttrOp::Exists, Some(_)) => true,
            (AttrOp::Equals(v), Some(have)) => have == v,
            (AttrOp::Prefix(v), Some(have)) => have.starts_with(v.as_str()),
            (AttrOp::Suffix(v), Some(have)) => have.ends_with(v.as_str()),
            (AttrOp::Contains(v), Some(have)) => have.contains(v.as_str()),
        }
    })
}

fn match_from<D: Dom + ?Sized>(
    dom: &D,
    parts: &[(Combinator, Compound)],
    index: usize,
    node: usize,
) -> bool {
    let (combinator, compound) = &parts[index];
    if !compound_matches(dom, compound, node) {
        return false;
    }
    if index == 0 {
        return true;
    }
    match combinator {
        Combinator::Child => dom
            .parent(node)
            .is_some_and(|p| match_from(dom, parts, index - 1, p)),
        Combinator::Descendant => {
            let mut ancestor = dom.parent(node);
            while let Some(a) = ancestor {
                if match_from(dom, parts, index - 1, a) {
                    return true;
                }
                ancestor = dom.parent(a);
            }
            false
        }
    }
}
