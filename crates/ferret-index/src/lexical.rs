//! BM25 term index over chunk text, backed by an in-memory tantivy index.
//!
//! Text is pre-split with [`tokenize`] and indexed through a whitespace
//! analyzer, so identifier parts and whole identifiers are both terms.

use std::collections::HashSet;
use std::fmt;

use tantivy::collector::TopDocs;
use tantivy::query::{BooleanQuery, BoostQuery, Occur, Query, TermQuery};
use tantivy::schema::{
    Field, IndexRecordOption, STORED, STRING, Schema, TextFieldIndexing, TextOptions, Value,
};
use tantivy::tokenizer::{RemoveLongFilter, TextAnalyzer, WhitespaceTokenizer};
use tantivy::{Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, Term, doc};

use crate::retriever::SearchFilter;
use crate::store::{BoxFuture, StoreError};

const TOKENIZER: &str = "code";
const WRITER_HEAP_BYTES: usize = 50_000_000;
const MAX_TERM_BYTES: usize = 128;

/// Lowercased word tokens plus their `snake_case` and `camelCase` parts.
#[must_use]
pub fn tokenize(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    for word in text
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|w| !w.is_empty())
    {
        let lower = word.to_lowercase();
        let parts = split_identifier(word);
        if parts.len() > 1 {
            out.extend(parts);
        }
        out.push(lower);
    }
    out
}

fn split_identifier(word: &str) -> Vec<String> {
    let mut parts = Vec::new();
    for piece in word.split('_').filter(|p| !p.is_empty()) {
        let mut current = String::new();
        let mut prev_lower = false;
        for c in piece.chars() {
            if c.is_uppercase() && prev_lower && !current.is_empty() {
                parts.push(std::mem::take(&mut current).to_lowercase());
            }
            prev_lower = c.is_lowercase() || c.is_ascii_digit();
            current.push(c);
        }
        if !current.is_empty() {
            parts.push(current.to_lowercase());
        }
    }
    parts
}

/// Chunk documents keyed by id, with a `content` field and a separately
/// boosted `symbols` field.
///
/// Mutations are buffered in the writer until [`TermIndex::commit`]; searches
/// see the last commit.
pub struct TermIndex {
    index: Index,
    writer: Option<IndexWriter>,
    reader: Option<IndexReader>,
    f_id: Field,
    f_content: Field,
    f_symbols: Field,
}

impl fmt::Debug for TermIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TermIndex")
            .field("docs", &self.len())
            .field("pending_writer", &self.writer.is_some())
            .finish_non_exhaustive()
    }
}

impl Default for TermIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl TermIndex {
    #[must_use]
    pub fn new() -> Self {
        let text = TextOptions::default().set_indexing_options(
            TextFieldIndexing::default()
                .set_tokenizer(TOKENIZER)
                .set_index_option(IndexRecordOption::WithFreqs),
        );
        let mut builder = Schema::builder();
        let f_id = builder.add_text_field("id", STRING | STORED);
        let f_content = builder.add_text_field("content", text.clone());
        let f_symbols = builder.add_text_field("symbols", text);
        let index = Index::create_in_ram(builder.build());
        index.tokenizers().register(
            TOKENIZER,
            TextAnalyzer::builder(WhitespaceTokenizer::default())
                .filter(RemoveLongFilter::limit(MAX_TERM_BYTES))
                .build(),
        );
        Self {
            index,
            writer: None,
            reader: None,
            f_id,
            f_content,
            f_symbols,
        }
    }

    /// Committed documents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.reader.as_ref().map_or(0, |r| {
            usize::try_from(r.searcher().num_docs()).unwrap_or(usize::MAX)
        })
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn writer(&mut self) -> tantivy::Result<&mut IndexWriter> {
        if self.writer.is_none() {
            self.writer = Some(self.index.writer_with_num_threads(1, WRITER_HEAP_BYTES)?);
        }
        self.writer
            .as_mut()
            .ok_or_else(|| tantivy::TantivyError::InternalError("writer unavailable".into()))
    }

    /// Stage `text` under `id`, replacing any previous document.
    ///
    /// # Errors
    ///
    /// Fails when the index writer cannot be opened or rejects the document.
    pub fn insert<'a>(
        &mut self,
        id: &str,
        text: &str,
        symbols: impl IntoIterator<Item = &'a str>,
    ) -> tantivy::Result<()> {
        let content = tokenize(text).join(" ");
        let symbols = symbols
            .into_iter()
            .flat_map(tokenize)
            .collect::<Vec<_>>()
            .join(" ");
        let (f_id, f_content, f_symbols) = (self.f_id, self.f_content, self.f_symbols);
        let writer = self.writer()?;
        writer.delete_term(Term::from_field_text(f_id, id));
        writer.add_document(doc!(
            f_id => id.to_string(),
            f_content => content,
            f_symbols => symbols,
        ))?;
        Ok(())
    }

    /// Stage removal of `id`.
    ///
    /// # Errors
    ///
    /// Fails when the index writer cannot be opened.
    pub fn remove(&mut self, id: &str) -> tantivy::Result<()> {
        let f_id = self.f_id;
        self.writer()?.delete_term(Term::from_field_text(f_id, id));
        Ok(())
    }

    /// Publish staged changes to searches.
    ///
    /// # Errors
    ///
    /// Fails when the commit or the reader reload fails.
    pub fn commit(&mut self) -> tantivy::Result<()> {
        let Some(writer) = self.writer.as_mut() else {
            return Ok(());
        };
        writer.commit()?;
        match &self.reader {
            Some(reader) => reader.reload()?,
            None => {
                self.reader = Some(
                    self.index
                        .reader_builder()
                        .reload_policy(ReloadPolicy::Manual)
                        .try_into()?,
                );
            }
        }
        Ok(())
    }

    /// BM25 over chunk text plus `symbol_boost` times BM25 over the chunk's
    /// symbol names. Best first, ties by id.
    ///
    /// # Errors
    ///
    /// Fails when the searcher cannot read a segment.
    pub fn search(
        &self,
        query: &str,
        top_k: usize,
        symbol_boost: f32,
    ) -> tantivy::Result<Vec<(String, f32)>> {
        let Some(reader) = &self.reader else {
            return Ok(Vec::new());
        };
        if top_k == 0 {
            return Ok(Vec::new());
        }
        let mut seen = HashSet::new();
        let mut clauses: Vec<(Occur, Box<dyn Query>)> = Vec::new();
        for term in tokenize(query) {
            if !seen.insert(term.clone()) {
                continue;
            }
            clauses.push((
                Occur::Should,
                Box::new(TermQuery::new(
                    Term::from_field_text(self.f_content, &term),
                    IndexRecordOption::WithFreqs,
                )),
            ));
            if symbol_boost > 0.0 {
                let symbol = TermQuery::new(
                    Term::from_field_text(self.f_symbols, &term),
                    IndexRecordOption::WithFreqs,
                );
                clauses.push((
                    Occur::Should,
                    Box::new(BoostQuery::new(Box::new(symbol), symbol_boost)),
                ));
            }
        }
        if clauses.is_empty() {
            return Ok(Vec::new());
        }

        let searcher = reader.searcher();
        let top = searcher.search(&BooleanQuery::new(clauses), &TopDocs::with_limit(top_k))?;
        let mut hits = Vec::with_capacity(top.len());
        for (score, address) in top {
            let doc: TantivyDocument = searcher.doc(address)?;
            if let Some(id) = doc.get_first(self.f_id).and_then(|v| v.as_str()) {
                hits.push((id.to_string(), score));
            }
        }
        hits.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        Ok(hits)
    }
}

/// Ranked chunk ids for a text query, restricted to chunks `filter` accepts.
pub trait LexicalSearch: Send + Sync {
    fn query_lexical(
        &self,
        text: String,
        top_k: usize,
        filter: SearchFilter,
    ) -> BoxFuture<'_, Result<Vec<(String, f32)>, StoreError>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn indexed(docs: &[(&str, &str, &[&str])]) -> TermIndex {
        let mut idx = TermIndex::new();
        for (id, text, symbols) in docs {
            idx.insert(id, text, symbols.iter().copied()).unwrap();
        }
        idx.commit().unwrap();
        idx
    }

    #[test]
    fn tokenize_splits_identifiers() {
        let t = tokenize("fn parseConfig(max_file_bytes)");
        for expected in ["fn", "parse", "config", "parseconfig", "max", "file", "bytes", "max_file_bytes"] {
            assert!(t.contains(&expected.to_string()), "missing {expected}: {t:?}");
        }
    }

    #[test]
    fn tokenize_plain_word_once() {
        assert_eq!(tokenize("Hello, world"), ["hello", "world"]);
    }

    #[test]
    fn search_ranks_matching_docs() {
        let idx = indexed(&[
            ("a", "fn parse_config() { read file }", &["parse_config"]),
            ("b", "fn render() { draw triangle }", &["render"]),
            ("c", "config loader reads config file config", &[]),
        ]);
        let hits = idx.search("config", 10, 0.0).unwrap();
        let ids: Vec<&str> = hits.iter().map(|(id, _)| id.as_str()).collect();
        assert!(ids.contains(&"a"));
        assert!(ids.contains(&"c"));
        assert!(!ids.contains(&"b"));
        assert!(hits.windows(2).all(|w| w[0].1 >= w[1].1));
    }

    #[test]
    fn camel_case_query_matches_snake_case_code() {
        let idx = indexed(&[("a", "fn load_file_bytes() {}", &["load_file_bytes"])]);
        let hits = idx.search("loadFileBytes", 5, 1.0).unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn symbol_boost_lifts_definitions() {
        let idx = indexed(&[
            ("def", "fn area() {}", &["area"]),
            ("use", "let x = area(); let y = area();", &[]),
        ]);
        let plain = idx.search("area", 2, 0.0).unwrap();
        let boosted = idx.search("area", 2, 5.0).unwrap();
        assert_eq!(boosted[0].0, "def");
        let def_plain = plain.iter().find(|(id, _)| id == "def").unwrap().1;
        let def_boosted = boosted.iter().find(|(id, _)| id == "def").unwrap().1;
        assert!(def_boosted > def_plain);
    }

    #[test]
    fn remove_forgets_doc() {
        let mut idx = indexed(&[("a", "alpha", &[]), ("b", "alpha beta", &[])]);
        idx.remove("a").unwrap();
        idx.commit().unwrap();
        assert_eq!(idx.len(), 1);
        let hits = idx.search("alpha", 10, 0.0).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, "b");
    }

    #[test]
    fn reinsert_replaces() {
        let mut idx = indexed(&[("a", "alpha", &[])]);
        idx.insert("a", "beta", []).unwrap();
        idx.commit().unwrap();
        assert_eq!(idx.len(), 1);
        assert!(idx.search("alpha", 10, 0.0).unwrap().is_empty());
        assert_eq!(idx.search("beta", 10, 0.0).unwrap().len(), 1);
    }

    #[test]
    fn uncommitted_changes_are_invisible() {
        let mut idx = indexed(&[("a", "alpha", &[])]);
        idx.insert("b", "alpha", []).unwrap();
        assert_eq!(idx.search("alpha", 10, 0.0).unwrap().len(), 1);
        idx.commit().unwrap();
        assert_eq!(idx.search("alpha", 10, 0.0).unwrap().len(), 2);
    }

    #[test]
    fn empty_query_or_index() {
        let idx = TermIndex::new();
        assert!(idx.is_empty());
        assert!(idx.search("x", 5, 1.0).unwrap().is_empty());
        let idx = indexed(&[("a", "x", &[])]);
        assert!(idx.search("  ", 5, 1.0).unwrap().is_empty());
        assert!(idx.search("x", 0, 1.0).unwrap().is_empty());
    }
}
