use std::path::Path;

use anyhow::Result;
use common::Chunk;
use tantivy::schema::Value;
use tantivy::{
    Index, IndexReader, IndexWriter, TantivyDocument,
    collector::TopDocs,
    query::{BooleanQuery, Occur, Query, TermQuery},
    schema::{
        Field, IndexRecordOption, STORED, STRING, Schema, Term, TextFieldIndexing, TextOptions,
    },
    tokenizer::{TextAnalyzer, Token, TokenStream, Tokenizer},
};

const CODE_TOKENIZER: &str = "code";
const WRITER_HEAP_BYTES: usize = 50_000_000;

/// A chunk scored by the keyword sub-search.
#[derive(Debug, Clone, PartialEq)]
pub struct KeywordHit {
    pub chunk_id: String,
    pub path: String,
    pub start_line: usize,
    pub end_line: usize,
    pub text: String,
    pub score: f32,
}

/// Per-project full-text index with BM25 scoring (tantivy defaults:
/// k1=1.2, b=0.75, no stopwords). Each upsert/delete commits synchronously;
/// a crash leaves the index recoverable by reconciling against IndexState.
pub struct KeywordIndex {
    reader: IndexReader,
    writer: IndexWriter,
    fields: KeywordFields,
}

#[derive(Clone, Copy)]
struct KeywordFields {
    id: Field,
    path: Field,
    start_line: Field,
    end_line: Field,
    content: Field,
}

impl KeywordIndex {
    pub fn new_in_memory() -> Result<Self> {
        let index = Index::create_in_ram(build_schema());
        from_index(index)
    }

    pub fn open_or_create(index_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(index_dir)?;
        let meta = index_dir.join("meta.json");
        let index = if meta.exists() {
            Index::open_in_dir(index_dir)?
        } else {
            Index::create_in_dir(index_dir, build_schema())?
        };
        from_index(index)
    }

    /// Idempotent per chunk id: existing docs with the same id are replaced.
    pub fn upsert_chunks(&mut self, chunks: &[Chunk]) -> Result<()> {
        for chunk in chunks {
            self.writer
                .delete_term(Term::from_field_text(self.fields.id, &chunk.id));
            let mut doc = TantivyDocument::default();
            doc.add_text(self.fields.id, &chunk.id);
            doc.add_text(self.fields.path, &chunk.path);
            doc.add_u64(self.fields.start_line, chunk.start_line as u64);
            doc.add_u64(self.fields.end_line, chunk.end_line as u64);
            doc.add_text(self.fields.content, &chunk.text);
            self.writer.add_document(doc)?;
        }
        self.commit()
    }

    pub fn delete_by_file(&mut self, path: &str) -> Result<()> {
        self.writer
            .delete_term(Term::from_field_text(self.fields.path, path));
        self.commit()
    }

    pub fn rebuild(&mut self) -> Result<()> {
        self.writer.delete_all_documents()?;
        self.commit()
    }

    /// Top-`limit` chunks by BM25 score, ties broken by chunk id ascending.
    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<KeywordHit>> {
        let tokens = code_tokens(query);
        if tokens.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let subqueries = tokens
            .iter()
            .map(|token| {
                let term = Term::from_field_text(self.fields.content, token);
                let query: Box<dyn Query> =
                    Box::new(TermQuery::new(term, IndexRecordOption::WithFreqs));
                (Occur::Should, query)
            })
            .collect::<Vec<_>>();
        let query = BooleanQuery::new(subqueries);

        let searcher = self.reader.searcher();
        let docs = searcher.search(&query, &TopDocs::with_limit(limit))?;

        let mut hits = Vec::with_capacity(docs.len());
        for (score, address) in docs {
            let doc: TantivyDocument = searcher.doc(address)?;
            let field_text = |field: Field| {
                doc.get_first(field)
                    .and_then(|v| v.as_value().as_str().map(ToOwned::to_owned))
                    .unwrap_or_default()
            };
            let field_u64 = |field: Field| {
                doc.get_first(field)
                    .and_then(|v| v.as_value().as_u64())
                    .unwrap_or_default() as usize
            };
            hits.push(KeywordHit {
                chunk_id: field_text(self.fields.id),
                path: field_text(self.fields.path),
                start_line: field_u64(self.fields.start_line),
                end_line: field_u64(self.fields.end_line),
                text: field_text(self.fields.content),
                score,
            });
        }
        hits.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        Ok(hits)
    }

    pub fn doc_count(&self) -> usize {
        self.reader.searcher().num_docs() as usize
    }

    /// Distinct chunk ids currently present for a file.
    pub fn chunk_ids_for_file(&self, path: &str) -> Result<Vec<String>> {
        let term = Term::from_field_text(self.fields.path, path);
        let query = TermQuery::new(term, IndexRecordOption::Basic);
        let searcher = self.reader.searcher();
        let docs = searcher.search(&query, &TopDocs::with_limit(usize::from(u16::MAX)))?;
        let mut ids = Vec::with_capacity(docs.len());
        for (_, address) in docs {
            let doc: TantivyDocument = searcher.doc(address)?;
            if let Some(id) = doc
                .get_first(self.fields.id)
                .and_then(|v| v.as_value().as_str())
            {
                ids.push(id.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }

    fn commit(&mut self) -> Result<()> {
        self.writer.commit()?;
        self.reader.reload()?;
        Ok(())
    }
}

fn build_schema() -> Schema {
    let mut schema_builder = Schema::builder();
    let content_indexing = TextFieldIndexing::default()
        .set_tokenizer(CODE_TOKENIZER)
        .set_index_option(IndexRecordOption::WithFreqsAndPositions);
    let content_options = TextOptions::default()
        .set_indexing_options(content_indexing)
        .set_stored();
    let _ = schema_builder.add_text_field("id", STRING | STORED);
    let _ = schema_builder.add_text_field("path", STRING | STORED);
    let _ = schema_builder.add_u64_field("start_line", STORED);
    let _ = schema_builder.add_u64_field("end_line", STORED);
    let _ = schema_builder.add_text_field("content", content_options);
    schema_builder.build()
}

fn from_index(index: Index) -> Result<KeywordIndex> {
    index.tokenizers().register(
        CODE_TOKENIZER,
        TextAnalyzer::builder(CodeTokenizer).build(),
    );
    let schema = index.schema();
    let fields = KeywordFields {
        id: schema.get_field("id")?,
        path: schema.get_field("path")?,
        start_line: schema.get_field("start_line")?,
        end_line: schema.get_field("end_line")?,
        content: schema.get_field("content")?,
    };
    let writer = index.writer(WRITER_HEAP_BYTES)?;
    let reader = index.reader()?;
    Ok(KeywordIndex {
        reader,
        writer,
        fields,
    })
}

/// Lowercased alphanumeric-plus-underscore runs, with each CJK character as
/// its own token. Used for both indexing and query building so the two
/// sides always agree.
pub fn code_tokens(text: &str) -> Vec<String> {
    let mut tokenizer = CodeTokenizer;
    let mut stream = tokenizer.token_stream(text);
    let mut out = Vec::new();
    while stream.advance() {
        out.push(stream.token().text.clone());
    }
    out
}

#[derive(Clone, Default)]
struct CodeTokenizer;

struct CodeTokenStream<'a> {
    text: &'a str,
    offset: usize,
    token: Token,
}

impl Tokenizer for CodeTokenizer {
    type TokenStream<'a> = CodeTokenStream<'a>;

    fn token_stream<'a>(&'a mut self, text: &'a str) -> CodeTokenStream<'a> {
        CodeTokenStream {
            text,
            offset: 0,
            token: Token {
                position: usize::MAX,
                ..Token::default()
            },
        }
    }
}

impl CodeTokenStream<'_> {
    fn emit(&mut self, from: usize, to: usize) {
        self.token.offset_from = from;
        self.token.offset_to = to;
        self.token.position = self.token.position.wrapping_add(1);
        self.token.text.clear();
        for c in self.text[from..to].chars() {
            for lower in c.to_lowercase() {
                self.token.text.push(lower);
            }
        }
    }
}

impl TokenStream for CodeTokenStream<'_> {
    fn advance(&mut self) -> bool {
        let text = self.text;
        let mut iter = text[self.offset..].char_indices().peekable();
        while let Some((rel, c)) = iter.next() {
            let abs = self.offset + rel;
            if is_cjk(c) {
                let end = abs + c.len_utf8();
                self.emit(abs, end);
                self.offset = end;
                return true;
            }
            if is_word_char(c) {
                let mut end = abs + c.len_utf8();
                while let Some(&(rel_next, next)) = iter.peek() {
                    if is_word_char(next) && !is_cjk(next) {
                        end = self.offset + rel_next + next.len_utf8();
                        let _ = iter.next();
                    } else {
                        break;
                    }
                }
                self.emit(abs, end);
                self.offset = end;
                return true;
            }
        }
        self.offset = text.len();
        false
    }

    fn token(&self) -> &Token {
        &self.token
    }

    fn token_mut(&mut self) -> &mut Token {
        &mut self.token
    }
}

fn is_word_char(c: char) -> bool {
    (c.is_alphanumeric() || c == '_') && !is_cjk(c)
}

fn is_cjk(c: char) -> bool {
    matches!(c,
        '\u{4E00}'..='\u{9FFF}'      // CJK unified ideographs
        | '\u{3400}'..='\u{4DBF}'    // extension A
        | '\u{F900}'..='\u{FAFF}'    // compatibility ideographs
        | '\u{3040}'..='\u{30FF}'    // hiragana + katakana
        | '\u{AC00}'..='\u{D7AF}'    // hangul syllables
    )
}

#[cfg(test)]
mod tests {
    use common::{Chunk, FileKind};

    use super::{KeywordIndex, code_tokens};

    fn chunk(id: &str, path: &str, text: &str) -> Chunk {
        Chunk {
            id: id.to_string(),
            path: path.to_string(),
            ordinal: 0,
            start_line: 1,
            end_line: 2,
            kind: FileKind::Code,
            text: text.to_string(),
        }
    }

    #[test]
    fn tokenizer_splits_identifier_runs_and_lowercases() {
        assert_eq!(
            code_tokens("fn check_user(id: u32) -> Result<bool>"),
            vec!["fn", "check_user", "id", "u32", "result", "bool"]
        );
    }

    #[test]
    fn tokenizer_isolates_cjk_characters() {
        assert_eq!(code_tokens("登录 login"), vec!["登", "录", "login"]);
    }

    #[test]
    fn search_finds_matching_chunk() {
        let mut index = KeywordIndex::new_in_memory().expect("index");
        index
            .upsert_chunks(&[
                chunk("p:a.py:0", "a.py", "def login(u, p):\n    return check(u, p)"),
                chunk("p:b.py:0", "b.py", "def unrelated():\n    pass"),
            ])
            .expect("upsert");

        let hits = index.search("login function", 10).expect("search");
        assert_eq!(hits[0].chunk_id, "p:a.py:0");
        assert!(hits[0].score > 0.0);
    }

    #[test]
    fn upsert_is_idempotent_per_chunk_id() {
        let mut index = KeywordIndex::new_in_memory().expect("index");
        let first = chunk("p:a.py:0", "a.py", "def login(): pass");
        index.upsert_chunks(std::slice::from_ref(&first)).expect("upsert");
        index.upsert_chunks(&[first]).expect("re-upsert");
        assert_eq!(index.doc_count(), 1);
    }

    #[test]
    fn delete_by_file_removes_all_chunks_for_path() {
        let mut index = KeywordIndex::new_in_memory().expect("index");
        index
            .upsert_chunks(&[
                chunk("p:a.py:0", "a.py", "def login(): pass"),
                chunk("p:a.py:1", "a.py", "def logout(): pass"),
                chunk("p:b.py:0", "b.py", "def keep(): pass"),
            ])
            .expect("upsert");

        index.delete_by_file("a.py").expect("delete");
        assert_eq!(index.doc_count(), 1);
        assert!(index.chunk_ids_for_file("a.py").expect("ids").is_empty());
        assert_eq!(
            index.chunk_ids_for_file("b.py").expect("ids"),
            vec!["p:b.py:0".to_string()]
        );
    }

    #[test]
    fn empty_query_returns_no_hits() {
        let mut index = KeywordIndex::new_in_memory().expect("index");
        index
            .upsert_chunks(&[chunk("p:a.py:0", "a.py", "def login(): pass")])
            .expect("upsert");
        assert!(index.search("", 10).expect("search").is_empty());
        assert!(index.search("!!! ...", 10).expect("search").is_empty());
    }

    #[test]
    fn rebuild_drops_every_document() {
        let mut index = KeywordIndex::new_in_memory().expect("index");
        index
            .upsert_chunks(&[chunk("p:a.py:0", "a.py", "def login(): pass")])
            .expect("upsert");
        index.rebuild().expect("rebuild");
        assert_eq!(index.doc_count(), 0);
    }
}
