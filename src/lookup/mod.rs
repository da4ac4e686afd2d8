//! Tantivy-based card lookup.
//!
//! Full-text search over card question, answer, keywords and tags with
//! field boosting. The index is kept current from the card change feed.

use std::path::Path;
use std::sync::Arc;
use tantivy::collector::TopDocs;
use tantivy::query::{BooleanQuery, BoostQuery, Occur, Query, QueryParser};
use tantivy::schema::{Field, Schema, Value, STORED, STRING, TEXT};
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, Term};
use tokio::sync::RwLock;

use crate::cards::{StoreEvent, StoreEvents};
use crate::errors::StoreError;
use crate::models::{Card, CardChange};

const BOOST_QUESTION: f32 = 10.0;
const BOOST_KEYWORDS: f32 = 8.5;
const BOOST_ANSWER: f32 = 6.0;
const BOOST_TAGS: f32 = 4.0;

const WRITER_HEAP: usize = 50_000_000;

/// A matching card and its relevance score.
#[derive(Debug, Clone, PartialEq)]
pub struct LookupResult {
    pub card_id: String,
    pub score: f32,
}

struct LookupFields {
    card_id: Field,
    question: Field,
    answer: Field,
    keywords: Field,
    tags: Field,
}

/// Search index over cards.
pub struct CardIndex {
    index: Index,
    reader: IndexReader,
    writer: Arc<RwLock<IndexWriter>>,
    fields: LookupFields,
}

impl CardIndex {
    /// Create or open an index at `index_path`.
    pub fn open(index_path: &Path) -> Result<Self, StoreError> {
        std::fs::create_dir_all(index_path)
            .map_err(|e| StoreError::Search(format!("Failed to create index directory: {}", e)))?;

        let (schema, fields) = schema();
        let index = Index::open_in_dir(index_path)
            .or_else(|_| Index::create_in_dir(index_path, schema))
            .map_err(|e| StoreError::Search(format!("Failed to open/create index: {}", e)))?;

        Self::with_index(index, fields)
    }

    /// An index that lives only in memory.
    pub fn in_memory() -> Result<Self, StoreError> {
        let (schema, fields) = schema();
        Self::with_index(Index::create_in_ram(schema), fields)
    }

    fn with_index(index: Index, fields: LookupFields) -> Result<Self, StoreError> {
        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()
            .map_err(|e| StoreError::Search(format!("Failed to create reader: {}", e)))?;

        let writer = index
            .writer(WRITER_HEAP)
            .map_err(|e| StoreError::Search(format!("Failed to create writer: {}", e)))?;

        Ok(Self {
            index,
            reader,
            writer: Arc::new(RwLock::new(writer)),
            fields,
        })
    }

    /// Replace the whole index with `cards`.
    pub async fn rebuild(&self, cards: &[Card]) -> Result<(), StoreError> {
        let mut writer = self.writer.write().await;

        writer.delete_all_documents()?;
        for card in cards {
            writer.add_document(self.create_document(card))?;
        }
        writer.commit()?;
        self.reader.reload()?;

        tracing::info!("Card index rebuilt with {} cards", cards.len());
        Ok(())
    }

    pub async fn index_card(&self, card: &Card) -> Result<(), StoreError> {
        let mut writer = self.writer.write().await;

        writer.delete_term(self.id_term(&card.id));
        writer.add_document(self.create_document(card))?;
        writer.commit()?;
        self.reader.reload()?;

        Ok(())
    }

    pub async fn remove_card(&self, card_id: &str) -> Result<(), StoreError> {
        let mut writer = self.writer.write().await;

        writer.delete_term(self.id_term(card_id));
        writer.commit()?;
        self.reader.reload()?;

        Ok(())
    }

    /// Bring the index in line with one card change.
    pub async fn apply_change(&self, change: &CardChange) -> Result<(), StoreError> {
        match &change.card {
            Some(card) if !change.deleted => self.index_card(card).await,
            _ => self.remove_card(&change.id).await,
        }
    }

    /// Apply the next card event from `events`.
    ///
    /// Returns `false` once the store has shut down.
    pub async fn follow(&self, events: &mut StoreEvents) -> Result<bool, StoreError> {
        match events.recv().await? {
            Some(StoreEvent::Card(change)) => {
                self.apply_change(&change).await?;
                Ok(true)
            }
            Some(StoreEvent::Review(_)) => Ok(true),
            None => Ok(false),
        }
    }

    /// Cards matching `query_str`, best first.
    pub fn search(
        &self,
        query_str: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<LookupResult>, StoreError> {
        if query_str.trim().is_empty() {
            return Ok(Vec::new());
        }

        let searcher = self.reader.searcher();

        let query_parser = QueryParser::for_index(
            &self.index,
            vec![
                self.fields.question,
                self.fields.answer,
                self.fields.keywords,
                self.fields.tags,
            ],
        );
        let base_query = query_parser
            .parse_query(query_str)
            .map_err(|e| StoreError::BadRequest(format!("Invalid lookup query: {}", e)))?;

        let field_queries = [
            (self.fields.question, BOOST_QUESTION),
            (self.fields.keywords, BOOST_KEYWORDS),
            (self.fields.answer, BOOST_ANSWER),
            (self.fields.tags, BOOST_TAGS),
        ];
        let subqueries: Vec<(Occur, Box<dyn Query>)> = field_queries
            .into_iter()
            .filter_map(|(field, boost)| {
                let parser = QueryParser::for_index(&self.index, vec![field]);
                let query = parser.parse_query(query_str).ok()?;
                Some((Occur::Should, Box::new(BoostQuery::new(query, boost)) as Box<dyn Query>))
            })
            .collect();

        let combined_query = if subqueries.is_empty() {
            base_query
        } else {
            Box::new(BooleanQuery::new(subqueries))
        };

        let top_docs = searcher
            .search(&combined_query, &TopDocs::with_limit(limit + offset))
            .map_err(|e| StoreError::Search(format!("Lookup failed: {}", e)))?;

        let results = top_docs
            .into_iter()
            .skip(offset)
            .take(limit)
            .filter_map(|(score, doc_address)| {
                let doc: TantivyDocument = searcher.doc(doc_address).ok()?;
                let card_id = doc.get_first(self.fields.card_id)?.as_str()?.to_string();
                Some(LookupResult { card_id, score })
            })
            .collect();

        Ok(results)
    }

    fn id_term(&self, card_id: &str) -> Term {
        Term::from_field_text(self.fields.card_id, card_id)
    }

    fn create_document(&self, card: &Card) -> TantivyDocument {
        doc!(
            self.fields.card_id => card.id.clone(),
            self.fields.question => card.question.clone(),
            self.fields.answer => card.answer.clone(),
            self.fields.keywords => card.keywords.join(" "),
            self.fields.tags => card.tags.join(" ")
        )
    }
}

fn schema() -> (Schema, LookupFields) {
    let mut schema_builder = Schema::builder();
    // Raw token so deletes by id match exactly.
    let card_id = schema_builder.add_text_field("card_id", STRING | STORED);
    let question = schema_builder.add_text_field("question", TEXT);
    let answer = schema_builder.add_text_field("answer", TEXT);
    let keywords = schema_builder.add_text_field("keywords", TEXT);
    let tags = schema_builder.add_text_field("tags", TEXT);

    let fields = LookupFields {
        card_id,
        question,
        answer,
        keywords,
        tags,
    };
    (schema_builder.build(), fields)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cards::CardStore;
    use crate::models::{CardPatch, Progress};
    use chrono::Utc;
    use std::time::Duration;
    use tempfile::TempDir;

    fn card(id: &str, question: &str, answer: &str, keywords: &[&str]) -> Card {
        let now = Utc::now();
        Card {
            id: id.to_string(),
            rev: "1-00".into(),
            question: question.to_string(),
            answer: answer.to_string(),
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
            tags: vec![],
            created: now,
            modified: now,
            progress: Progress::default(),
        }
    }

    fn ids(results: &[LookupResult]) -> Vec<&str> {
        results.iter().map(|r| r.card_id.as_str()).collect()
    }

    #[tokio::test]
    async fn test_rebuild_and_search() {
        let temp_dir = TempDir::new().unwrap();
        let index = CardIndex::open(temp_dir.path()).unwrap();

        index
            .rebuild(&[
                card("1", "What is the capital of France", "Paris", &[]),
                card("2", "Largest planet", "Jupiter", &["astronomy"]),
            ])
            .await
            .unwrap();

        assert_eq!(ids(&index.search("france", 10, 0).unwrap()), vec!["1"]);
        assert_eq!(ids(&index.search("astronomy", 10, 0).unwrap()), vec!["2"]);
    }

    #[tokio::test]
    async fn test_question_outranks_answer() {
        let index = CardIndex::in_memory().unwrap();
        index
            .rebuild(&[
                card("a", "Explain recursion briefly", "See below", &[]),
                card("b", "What is a loop", "Not recursion", &[]),
            ])
            .await
            .unwrap();

        let results = index.search("recursion", 10, 0).unwrap();
        assert_eq!(ids(&results), vec!["a", "b"]);
        assert!(results[0].score > results[1].score);
    }

    #[tokio::test]
    async fn test_pagination() {
        let index = CardIndex::in_memory().unwrap();
        let cards: Vec<Card> = (0..5)
            .map(|i| card(&format!("c{}", i), "shared term", "", &[]))
            .collect();
        index.rebuild(&cards).await.unwrap();

        assert_eq!(index.search("shared", 2, 0).unwrap().len(), 2);
        assert_eq!(index.search("shared", 2, 4).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_apply_change_updates_and_removes() {
        let index = CardIndex::in_memory().unwrap();
        let original = card("card1", "Old wording", "", &[]);
        index.apply_change(&CardChange::updated(original)).await.unwrap();
        assert_eq!(ids(&index.search("old", 10, 0).unwrap()), vec!["card1"]);

        let edited = card("card1", "New wording", "", &[]);
        index.apply_change(&CardChange::updated(edited)).await.unwrap();
        assert!(index.search("old", 10, 0).unwrap().is_empty());
        assert_eq!(ids(&index.search("new", 10, 0).unwrap()), vec!["card1"]);

        index.apply_change(&CardChange::deleted("card1")).await.unwrap();
        assert!(index.search("wording", 10, 0).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_search_empty_query() {
        let index = CardIndex::in_memory().unwrap();
        assert!(index.search("   ", 10, 0).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_follows_card_feed() {
        let store = CardStore::in_memory().await.unwrap();
        let mut events = store.subscribe();
        let index = CardIndex::in_memory().unwrap();

        let created = store
            .put_card(CardPatch::new("Mitochondria", "Powerhouse of the cell"))
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_secs(5), index.follow(&mut events))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            ids(&index.search("powerhouse", 10, 0).unwrap()),
            vec![created.id.as_str()]
        );
    }
}
