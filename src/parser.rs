//! Text extraction from source files.
//!
//! A [`ParserRegistry`] maps file-type tags (lowercase extensions) to
//! [`DocumentParser`]s. Every parser produces a [`ParsedDocument`] whose
//! `full_text` is what chunk offsets point into.

use std::{
    collections::{BTreeMap, HashMap},
    io::{Read, Seek},
    path::{Path, PathBuf},
    sync::Arc,
};

use pdf_oxide::PdfDocument;
use scraper::{ElementRef, Html, Node, Selector};
use zip::ZipArchive;

use crate::{
    chunking::{ChunkingConfig, chunk_text},
    error::ParseError,
};

/// Separates pages in plain-text sources and in `full_text` of paged
/// documents.
pub const PAGE_BREAK: char = '\x0c';

/// A page-tagged span `[char_start, char_end)` of a document's full text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Section {
    pub page: Option<u32>,
    pub char_start: usize,
    pub char_end: usize,
}

/// A chunk of a parsed document, with offsets into its full text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkSpan {
    pub content: String,
    pub page: Option<u32>,
    pub char_start: usize,
    pub char_end: usize,
}

#[derive(Debug, Clone)]
pub struct ParsedDocument {
    pub filename: String,
    pub source_path: PathBuf,
    pub file_type: String,
    pub full_text: String,
    pub sections: Vec<Section>,
    pub size_bytes: u64,
    pub metadata: BTreeMap<String, String>,
}

impl ParsedDocument {
    /// A document made of a single unpaged section.
    pub fn from_text(
        source_path: impl Into<PathBuf>,
        file_type: &str,
        text: impl Into<String>,
    ) -> Self {
        let source_path = source_path.into();
        let full_text = text.into();
        let char_len = full_text.chars().count();
        Self {
            filename: file_name(&source_path),
            file_type: file_type.to_string(),
            size_bytes: full_text.len() as u64,
            sections: vec![Section {
                page: None,
                char_start: 0,
                char_end: char_len,
            }],
            full_text,
            source_path,
            metadata: BTreeMap::new(),
        }
    }

    /// A paged document. Pages without text are dropped and the rest are
    /// joined with [`PAGE_BREAK`], each section keeping its trailing break.
    pub fn from_pages(
        source_path: impl Into<PathBuf>,
        file_type: &str,
        pages: impl IntoIterator<Item = (u32, String)>,
    ) -> Self {
        let pages: Vec<(u32, String)> = pages
            .into_iter()
            .map(|(page, text)| (page, text.trim().to_string()))
            .filter(|(_, text)| !text.is_empty())
            .collect();

        let mut doc = Self::from_text(source_path, file_type, String::new());
        if pages.is_empty() {
            return doc;
        }

        doc.sections.clear();
        let last = pages.len() - 1;
        let mut char_start = 0;
        for (i, (page, text)) in pages.into_iter().enumerate() {
            let mut char_end = char_start + text.chars().count();
            doc.full_text.push_str(&text);
            if i < last {
                doc.full_text.push(PAGE_BREAK);
                char_end += 1;
            }
            doc.sections.push(Section {
                page: Some(page),
                char_start,
                char_end,
            });
            char_start = char_end;
        }
        doc.size_bytes = doc.full_text.len() as u64;
        doc
    }

    /// Chunk every section independently and shift the spans so their
    /// offsets address `full_text`.
    pub fn chunk(&self, config: &ChunkingConfig) -> Vec<ChunkSpan> {
        let char_to_byte: Vec<usize> = self
            .full_text
            .char_indices()
            .map(|(byte_idx, _)| byte_idx)
            .chain(std::iter::once(self.full_text.len()))
            .collect();

        let mut spans = Vec::new();
        for section in &self.sections {
            let start = char_to_byte[section.char_start];
            let end = char_to_byte[section.char_end];
            let text = &self.full_text[start..end];

            for chunk in chunk_text(text, config.chunk_size, config.overlap) {
                spans.push(ChunkSpan {
                    content: chunk.text,
                    page: section.page,
                    char_start: section.char_start + chunk.char_start,
                    char_end: section.char_start + chunk.char_end,
                });
            }
        }
        spans
    }
}

/// Extracts text from one kind of file.
pub trait DocumentParser: Send + Sync {
    fn parse(&self, path: &Path) -> Result<ParsedDocument, ParseError>;
}

/// File-type dispatch for [`DocumentParser`]s.
#[derive(Clone, Default)]
pub struct ParserRegistry {
    parsers: HashMap<String, Arc<dyn DocumentParser>>,
}

impl ParserRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in text, markdown, HTML, PDF and EPUB
    /// parsers.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        let text = Arc::new(PlainTextParser);
        registry.register("txt", text.clone());
        registry.register("md", text.clone());
        registry.register("markdown", text);
        let html = Arc::new(HtmlParser);
        registry.register("html", html.clone());
        registry.register("htm", html);
        registry.register("pdf", Arc::new(PdfParser));
        registry.register("epub", Arc::new(EpubParser));
        registry
    }

    pub fn register(&mut self, file_type: &str, parser: Arc<dyn DocumentParser>) {
        self.parsers.insert(file_type.to_lowercase(), parser);
    }

    /// The file-type tag of `path`, if a parser is registered for it.
    pub fn file_type(&self, path: &Path) -> Option<String> {
        let ext = path.extension()?.to_str()?.to_lowercase();
        self.parsers.contains_key(&ext).then_some(ext)
    }

    pub fn supports(&self, path: &Path) -> bool {
        self.file_type(path).is_some()
    }

    /// Registered tags, sorted.
    pub fn file_types(&self) -> Vec<&str> {
        let mut tags: Vec<&str> = self.parsers.keys().map(String::as_str).collect();
        tags.sort_unstable();
        tags
    }

    pub fn parse(&self, path: &Path) -> Result<ParsedDocument, ParseError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();
        let parser = self
            .parsers
            .get(&ext)
            .ok_or_else(|| ParseError::Unsupported(path.display().to_string()))?;
        parser.parse(path)
    }
}

impl std::fmt::Debug for ParserRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParserRegistry")
            .field("file_types", &self.file_types())
            .finish()
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

fn read_source(path: &Path) -> Result<(String, u64), ParseError> {
    let bytes = std::fs::read(path).map_err(|source| ParseError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let size = bytes.len() as u64;
    let text = String::from_utf8(bytes).map_err(|_| {
        ParseError::Malformed(format!("{} is not valid UTF-8", path.display()))
    })?;
    Ok((text, size))
}

/// Plain text and markdown, read verbatim.
///
/// Form feeds split the text into pages numbered from 1. Each page keeps
/// its trailing form feed so the sections tile the whole text.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTextParser;

impl DocumentParser for PlainTextParser {
    fn parse(&self, path: &Path) -> Result<ParsedDocument, ParseError> {
        let (text, size_bytes) = read_source(path)?;
        let mut doc = ParsedDocument::from_text(path, &extension_of(path), text);
        doc.size_bytes = size_bytes;

        if doc.full_text.contains(PAGE_BREAK) {
            doc.sections = paginate(&doc.full_text);
        }
        Ok(doc)
    }
}

fn paginate(text: &str) -> Vec<Section> {
    let mut sections = Vec::new();
    let mut start = 0;
    let mut page = 1;

    for (i, c) in text.chars().enumerate() {
        if c == PAGE_BREAK {
            sections.push(Section {
                page: Some(page),
                char_start: start,
                char_end: i + 1,
            });
            start = i + 1;
            page += 1;
        }
    }

    let len = text.chars().count();
    if start < len {
        sections.push(Section {
            page: Some(page),
            char_start: start,
            char_end: len,
        });
    }
    sections
}

/// Elements whose text is never visible.
const HIDDEN_ELEMENTS: &[&str] =
    &["head", "script", "style", "noscript", "template", "iframe", "svg"];

/// Elements that do not break the flow of text around them.
const INLINE_ELEMENTS: &[&str] = &[
    "a", "abbr", "b", "bdi", "bdo", "cite", "code", "data", "dfn", "em", "i",
    "kbd", "mark", "q", "s", "samp", "small", "span", "strong", "sub", "sup",
    "time", "u", "var", "wbr",
];

/// HTML reduced to its visible text.
///
/// Text nodes under `<body>` are kept with entities decoded. Hidden
/// elements such as `<script>` and `<style>` are skipped and whitespace
/// runs collapse to one space. The `<title>` text is kept as
/// `metadata["title"]`.
#[derive(Debug, Clone, Copy, Default)]
pub struct HtmlParser;

impl DocumentParser for HtmlParser {
    fn parse(&self, path: &Path) -> Result<ParsedDocument, ParseError> {
        let (html, size_bytes) = read_source(path)?;
        let document = Html::parse_document(&html);
        let title = html_title(&document)?;
        let text = html_to_text(&document)?;

        let mut doc = ParsedDocument::from_text(path, &extension_of(path), text);
        doc.size_bytes = size_bytes;
        if let Some(title) = title {
            doc.metadata.insert("title".to_string(), title);
        }
        Ok(doc)
    }
}

fn selector(css: &str) -> Result<Selector, ParseError> {
    Selector::parse(css)
        .map_err(|e| ParseError::Malformed(format!("invalid selector {css:?}: {e}")))
}

/// Visible text of an HTML document's body.
pub fn html_to_text(document: &Html) -> Result<String, ParseError> {
    let body = selector("body")?;
    let mut text = String::new();
    match document.select(&body).next() {
        Some(body) => collect_text(body, &mut text),
        None => collect_text(document.root_element(), &mut text),
    }
    Ok(collapse_whitespace(&text))
}

fn collect_text(element: ElementRef<'_>, out: &mut String) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => out.push_str(text),
            Node::Element(el) if HIDDEN_ELEMENTS.contains(&el.name()) => {}
            Node::Element(el) => {
                let Some(child) = ElementRef::wrap(child) else {
                    continue;
                };
                let block = !INLINE_ELEMENTS.contains(&el.name());
                if block {
                    out.push(' ');
                }
                collect_text(child, out);
                if block {
                    out.push(' ');
                }
            }
            _ => {}
        }
    }
}

fn html_title(document: &Html) -> Result<Option<String>, ParseError> {
    let title = selector("title")?;
    Ok(document
        .select(&title)
        .next()
        .map(|el| collapse_whitespace(&el.text().collect::<String>()))
        .filter(|t| !t.is_empty()))
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// PDF text, one section per page numbered from 1.
///
/// Pages without text are skipped but keep their number.
#[derive(Debug, Clone, Copy, Default)]
pub struct PdfParser;

impl DocumentParser for PdfParser {
    fn parse(&self, path: &Path) -> Result<ParsedDocument, ParseError> {
        let size_bytes = source_size(path)?;
        let mut pdf = PdfDocument::open(path).map_err(malformed(path))?;
        let page_count = pdf.page_count().map_err(malformed(path))?;
        let mut pages = Vec::with_capacity(page_count);
        for index in 0..page_count {
            let text = pdf.extract_text(index).map_err(malformed(path))?;
            pages.push((index as u32 + 1, text));
        }

        let mut doc = ParsedDocument::from_pages(path, "pdf", pages);
        doc.size_bytes = size_bytes;
        doc.metadata.insert("pages".to_string(), page_count.to_string());
        Ok(doc)
    }
}

/// EPUB books, one section per chapter in reading order.
///
/// Chapters are the spine items of the package document named by
/// `META-INF/container.xml`. Chapters without text are skipped and the rest
/// are numbered from 1. `dc:title` and `dc:creator` become the `title` and
/// `author` metadata.
#[derive(Debug, Clone, Copy, Default)]
pub struct EpubParser;

const EPUB_CONTAINER: &str = "META-INF/container.xml";

impl DocumentParser for EpubParser {
    fn parse(&self, path: &Path) -> Result<ParsedDocument, ParseError> {
        let size_bytes = source_size(path)?;
        let file = std::fs::File::open(path).map_err(|source| ParseError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut archive =
            ZipArchive::new(std::io::BufReader::new(file)).map_err(malformed(path))?;

        let container = read_entry(&mut archive, EPUB_CONTAINER)?;
        let package_path = rootfile_path(&container)?;
        let package = read_entry(&mut archive, &package_path)?;
        let book = EpubPackage::parse(&package, &package_path)?;

        let mut chapters = Vec::new();
        for href in &book.spine {
            let xhtml = read_entry(&mut archive, href)?;
            let text = html_to_text(&Html::parse_document(&xhtml))?;
            if !text.is_empty() {
                chapters.push((chapters.len() as u32 + 1, text));
            }
        }

        let chapter_count = chapters.len();
        let mut doc = ParsedDocument::from_pages(path, "epub", chapters);
        doc.size_bytes = size_bytes;
        doc.metadata.insert("pages".to_string(), chapter_count.to_string());
        if let Some(title) = book.title {
            doc.metadata.insert("title".to_string(), title);
        }
        if let Some(author) = book.author {
            doc.metadata.insert("author".to_string(), author);
        }
        Ok(doc)
    }
}

fn source_size(path: &Path) -> Result<u64, ParseError> {
    std::fs::metadata(path)
        .map(|m| m.len())
        .map_err(|source| ParseError::Read {
            path: path.to_path_buf(),
            source,
        })
}

fn malformed<E: std::fmt::Display>(path: &Path) -> impl Fn(E) -> ParseError + '_ {
    move |e| ParseError::Malformed(format!("{}: {e}", path.display()))
}

fn read_entry<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    name: &str,
) -> Result<String, ParseError> {
    let mut entry = archive
        .by_name(name)
        .map_err(|e| ParseError::Malformed(format!("epub entry {name}: {e}")))?;
    let mut text = String::new();
    entry
        .read_to_string(&mut text)
        .map_err(|e| ParseError::Malformed(format!("epub entry {name}: {e}")))?;
    Ok(text)
}

fn parse_xml<'a>(
    xml: &'a str,
    name: &str,
) -> Result<roxmltree::Document<'a>, ParseError> {
    roxmltree::Document::parse(xml)
        .map_err(|e| ParseError::Malformed(format!("{name}: {e}")))
}

fn rootfile_path(container: &str) -> Result<String, ParseError> {
    parse_xml(container, EPUB_CONTAINER)?
        .descendants()
        .filter(|n| n.has_tag_name("rootfile"))
        .find_map(|n| n.attribute("full-path"))
        .map(str::to_string)
        .ok_or_else(|| {
            ParseError::Malformed(format!("{EPUB_CONTAINER} names no rootfile"))
        })
}

/// The parts of an OPF package document that indexing needs.
#[derive(Debug, Default)]
struct EpubPackage {
    title: Option<String>,
    author: Option<String>,
    /// Archive paths of the spine items, in reading order.
    spine: Vec<String>,
}

impl EpubPackage {
    fn parse(opf: &str, opf_path: &str) -> Result<Self, ParseError> {
        let xml = parse_xml(opf, opf_path)?;
        let base = match opf_path.rfind('/') {
            Some(i) => &opf_path[..=i],
            None => "",
        };

        let text_of = |name: &str| {
            xml.descendants()
                .find(|n| n.tag_name().name() == name)
                .and_then(|n| n.text())
                .map(collapse_whitespace)
                .filter(|t| !t.is_empty())
        };

        let manifest: HashMap<&str, &str> = xml
            .descendants()
            .filter(|n| n.tag_name().name() == "item")
            .filter_map(|n| Some((n.attribute("id")?, n.attribute("href")?)))
            .collect();

        let spine = xml
            .descendants()
            .filter(|n| n.tag_name().name() == "itemref")
            .filter_map(|n| manifest.get(n.attribute("idref")?))
            .map(|href| format!("{base}{}", href.split('#').next().unwrap_or_default()))
            .collect();

        Ok(Self {
            title: text_of("title"),
            author: text_of("creator"),
            spine,
        })
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn plain_text_is_one_unpaged_section() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("notes.txt");
        std::fs::write(&path, "Hello there. General Kenobi.").unwrap();

        let doc = ParserRegistry::with_defaults().parse(&path).unwrap();
        assert_eq!(doc.filename, "notes.txt");
        assert_eq!(doc.file_type, "txt");
        assert_eq!(doc.size_bytes, 28);
        assert_eq!(
            doc.sections,
            vec![Section {
                page: None,
                char_start: 0,
                char_end: 28
            }]
        );
    }

    #[test]
    fn form_feeds_split_pages() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("book.md");
        std::fs::write(&path, "Page one.\x0cPage two.\x0cPage three.").unwrap();

        let doc = ParserRegistry::with_defaults().parse(&path).unwrap();
        let pages: Vec<_> = doc.sections.iter().map(|s| s.page).collect();
        assert_eq!(pages, vec![Some(1), Some(2), Some(3)]);
        assert_eq!(doc.sections[0].char_end, doc.sections[1].char_start);
        assert_eq!(
            doc.sections.last().unwrap().char_end,
            doc.full_text.chars().count()
        );

        let spans = doc.chunk(&ChunkingConfig::default());
        assert_eq!(spans.len(), 3);
        assert_eq!(spans[1].page, Some(2));
        assert!(spans[1].content.starts_with("Page two."));
        let chars: Vec<char> = doc.full_text.chars().collect();
        for span in &spans {
            let expected: String =
                chars[span.char_start..span.char_end].iter().collect();
            assert_eq!(span.content, expected);
        }
    }

    #[test]
    fn html_drops_markup_and_keeps_title() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("page.HTML");
        std::fs::write(
            &path,
            "<html><head><title>My  Page</title>\
             <STYLE>body { color: red; }</STYLE></head>\
             <body><p>Fish &amp; chips</p>\n\n<script>alert(1)</script>\
             <noscript>enable js</noscript><div>are   tasty.</div></body></html>",
        )
        .unwrap();

        let doc = ParserRegistry::with_defaults().parse(&path).unwrap();
        assert_eq!(doc.file_type, "html");
        assert_eq!(doc.full_text, "Fish & chips are tasty.");
        assert_eq!(doc.metadata.get("title").map(String::as_str), Some("My Page"));
    }

    #[test]
    fn html_decodes_named_and_numeric_entities() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("entities.html");
        std::fs::write(
            &path,
            "<body><p>Caf&eacute; &copy; 2024 &mdash; it&rsquo;s &#8364;5</p>\
             <p>Cr<b>&egrave;</b>me br&ucirc;l&eacute;e</p></body>",
        )
        .unwrap();

        let doc = ParserRegistry::with_defaults().parse(&path).unwrap();
        assert_eq!(
            doc.full_text,
            "Café © 2024 — it’s €5 Crème brûlée"
        );
    }

    #[test]
    fn html_keeps_text_after_a_bare_less_than() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("compare.html");
        std::fs::write(
            &path,
            "<p>if a < b then c</p><p>The tail survives.</p>",
        )
        .unwrap();

        let doc = ParserRegistry::with_defaults().parse(&path).unwrap();
        assert_eq!(doc.full_text, "if a < b then c The tail survives.");
        assert!(doc.metadata.is_empty());
    }

    #[test]
    fn pages_join_with_breaks_and_skip_blank_pages() {
        let pages = vec![
            (1, "First page.".to_string()),
            (2, "  \n ".to_string()),
            (3, " Third page. ".to_string()),
        ];
        let doc = ParsedDocument::from_pages("/docs/report.pdf", "pdf", pages);

        assert_eq!(doc.full_text, "First page.\x0cThird page.");
        assert_eq!(
            doc.sections,
            vec![
                Section {
                    page: Some(1),
                    char_start: 0,
                    char_end: 12
                },
                Section {
                    page: Some(3),
                    char_start: 12,
                    char_end: 23
                },
            ]
        );
        let spans = doc.chunk(&ChunkingConfig::default());
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[1].page, Some(3));
        assert_eq!(spans[1].content, "Third page.");

        let empty = ParsedDocument::from_pages("/docs/blank.pdf", "pdf", Vec::new());
        assert!(empty.full_text.is_empty());
        assert!(empty.chunk(&ChunkingConfig::default()).is_empty());
    }

    #[test]
    fn pdf_that_is_not_a_pdf_is_malformed() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("fake.pdf");
        std::fs::write(&path, "just some text, no pdf header").unwrap();

        let err = ParserRegistry::with_defaults().parse(&path).unwrap_err();
        assert!(matches!(err, ParseError::Malformed(_)), "{err:?}");

        let err = ParserRegistry::with_defaults()
            .parse(&tmp.path().join("absent.pdf"))
            .unwrap_err();
        assert!(matches!(err, ParseError::Read { .. }));
    }

    fn write_epub(path: &Path, files: &[(&str, &str)]) {
        use std::io::Write;

        use zip::write::SimpleFileOptions;

        let mut zip = zip::ZipWriter::new(std::fs::File::create(path).unwrap());
        for (name, content) in files {
            zip.start_file(*name, SimpleFileOptions::default()).unwrap();
            zip.write_all(content.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
    }

    const CONTAINER: &str = r#"<?xml version="1.0"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>"#;

    const PACKAGE: &str = r#"<?xml version="1.0"?>
<package xmlns="http://www.idpf.org/2007/opf" version="3.0">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
    <dc:title>Sea  Stories</dc:title>
    <dc:creator>A. Sailor</dc:creator>
  </metadata>
  <manifest>
    <item id="c2" href="text/two.xhtml" media-type="application/xhtml+xml"/>
    <item id="c1" href="text/one.xhtml" media-type="application/xhtml+xml"/>
    <item id="cover" href="text/cover.xhtml" media-type="application/xhtml+xml"/>
  </manifest>
  <spine>
    <itemref idref="cover"/>
    <itemref idref="c1"/>
    <itemref idref="c2"/>
  </spine>
</package>"#;

    #[test]
    fn epub_chapters_follow_the_spine() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("sea.epub");
        write_epub(
            &path,
            &[
                ("mimetype", "application/epub+zip"),
                ("META-INF/container.xml", CONTAINER),
                ("OEBPS/content.opf", PACKAGE),
                ("OEBPS/text/cover.xhtml", "<html><body><img/></body></html>"),
                (
                    "OEBPS/text/one.xhtml",
                    "<html><head><title>One</title></head>\
                     <body><h1>Departure</h1><p>The ship left port.</p></body></html>",
                ),
                (
                    "OEBPS/text/two.xhtml",
                    "<html><body><p>A storm &amp; a calm.</p></body></html>",
                ),
            ],
        );

        let doc = ParserRegistry::with_defaults().parse(&path).unwrap();
        assert_eq!(doc.file_type, "epub");
        assert_eq!(
            doc.full_text,
            "Departure The ship left port.\x0cA storm & a calm."
        );
        let pages: Vec<_> = doc.sections.iter().map(|s| s.page).collect();
        assert_eq!(pages, vec![Some(1), Some(2)]);
        assert_eq!(doc.metadata.get("title").map(String::as_str), Some("Sea Stories"));
        assert_eq!(doc.metadata.get("author").map(String::as_str), Some("A. Sailor"));
        assert_eq!(doc.metadata.get("pages").map(String::as_str), Some("2"));
        assert_eq!(doc.size_bytes, std::fs::metadata(&path).unwrap().len());
    }

    #[test]
    fn epub_without_container_is_malformed() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("broken.epub");
        write_epub(&path, &[("mimetype", "application/epub+zip")]);

        let err = ParserRegistry::with_defaults().parse(&path).unwrap_err();
        assert!(matches!(err, ParseError::Malformed(_)), "{err:?}");
    }

    #[test]
    fn unsupported_extension_is_rejected() {
        let err = ParserRegistry::with_defaults()
            .parse(Path::new("archive.zip"))
            .unwrap_err();
        assert!(matches!(err, ParseError::Unsupported(_)));
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let err = ParserRegistry::with_defaults()
            .parse(Path::new("/definitely/not/here.txt"))
            .unwrap_err();
        assert!(matches!(err, ParseError::Read { .. }));
    }

    #[test]
    fn invalid_utf8_is_malformed() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("binary.txt");
        std::fs::write(&path, [0xff, 0xfe, 0x00]).unwrap();
        let err = ParserRegistry::with_defaults().parse(&path).unwrap_err();
        assert!(matches!(err, ParseError::Malformed(_)));
    }

    #[test]
    fn registry_reports_types() {
        let registry = ParserRegistry::with_defaults();
        assert!(registry.supports(Path::new("a/b/readme.MD")));
        assert!(!registry.supports(Path::new("a/b/readme")));
        assert_eq!(
            registry.file_types(),
            vec!["epub", "htm", "html", "markdown", "md", "pdf", "txt"]
        );
    }
}
