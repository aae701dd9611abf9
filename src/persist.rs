// used for persistence
use rusqlite::{Connection, OptionalExtension, params};
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::{Result, SoundingsError};
use crate::evaluate;
use crate::pipeline::PipelineStage;
use crate::store::{CollectionStats, SampleStore};

/// Where the persistor keeps its collections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistenceMode {
    InMemory,
    File(String),
}

// ------------- Persistence -------------
// Collections are capped: once the documents of a collection outgrow the
// size the collection was created with, the oldest ones are evicted.
pub struct Persistor {
    connection: Arc<Mutex<Connection>>,
    max_collection_bytes: u64,
}

impl Persistor {
    pub fn new(mode: PersistenceMode, max_collection_bytes: u64) -> Result<Self> {
        let connection = match &mode {
            PersistenceMode::InMemory => Connection::open_in_memory()?,
            PersistenceMode::File(path) => Connection::open(path)?,
        };
        // The "STRICT" keyword introduced in 3.37.0 breaks JDBC connections, which makes
        // debugging using an external tool like DBeaver impossible
        connection.execute_batch(
            "
            create table if not exists Collection (
                Collection_Name text not null,
                MaxSize integer not null,
                constraint referenceable_Collection_Name primary key (
                    Collection_Name
                )
            );-- STRICT;
            create table if not exists Document (
                Document_Identity integer primary key autoincrement,
                Collection_Name text not null,
                Document text not null,
                DocumentSize integer not null,
                constraint Document_in_Collection foreign key (
                    Collection_Name
                ) references Collection(Collection_Name)
            );-- STRICT;
            create index if not exists Document_by_Collection on Document (
                Collection_Name,
                Document_Identity
            );
            ",
        )?;
        info!(?mode, max_collection_bytes, "opened sample store");
        Ok(Self {
            connection: Arc::new(Mutex::new(connection)),
            max_collection_bytes,
        })
    }

    // Runs database work off the async executor.
    async fn with_connection<T, F>(&self, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let connection = Arc::clone(&self.connection);
        tokio::task::spawn_blocking(move || {
            let mut connection = connection.lock()?;
            work(&mut *connection)
        })
        .await?
    }
}

fn load_documents(connection: &Connection, collection: &str) -> Result<Vec<Value>> {
    let mut statement = connection.prepare_cached(
        "
        select Document_Identity, Document
            from Document
            where Collection_Name = ?
            order by Document_Identity
        ",
    )?;
    let rows = statement.query_map(params![collection], |row| {
        Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
    })?;

    let mut documents = Vec::new();
    for row in rows {
        let (identity, text) = row?;
        documents.push(with_identity(serde_json::from_str(&text)?, identity)?);
    }
    Ok(documents)
}

fn with_identity(document: Value, identity: i64) -> Result<Value> {
    match document {
        Value::Object(fields) => {
            let mut identified = Map::with_capacity(fields.len() + 1);
            identified.insert("_id".to_owned(), Value::from(identity));
            identified.extend(fields);
            Ok(Value::Object(identified))
        }
        other => Err(SoundingsError::Persistence(format!(
            "document {identity} is not an object: {other}"
        ))),
    }
}

// Deletes the newest document that no longer fits, and everything older.
fn evict_overflow(connection: &Connection, collection: &str) -> Result<usize> {
    let evicted = connection.execute(
        "
        delete from Document
            where Collection_Name = ?1
            and Document_Identity <= (
                select Document_Identity from (
                    select d.Document_Identity,
                        sum(d.DocumentSize) over (order by d.Document_Identity desc) as Retained
                    from Document d
                    where d.Collection_Name = ?1
                )
                where Retained > (
                    select c.MaxSize from Collection c where c.Collection_Name = ?1
                )
                order by Document_Identity desc
                limit 1
            )
        ",
        params![collection],
    )?;
    Ok(evicted)
}

fn oldest_identity(connection: &Connection, collection: &str) -> Result<Option<i64>> {
    let oldest = connection.query_row(
        "select min(Document_Identity) from Document where Collection_Name = ?",
        params![collection],
        |row| row.get(0),
    )?;
    Ok(oldest)
}

#[async_trait]
impl SampleStore for Persistor {
    async fn aggregate(&self, collection: &str, pipeline: &[PipelineStage]) -> Result<Vec<Value>> {
        let collection = collection.to_owned();
        let pipeline = pipeline.to_vec();
        self.with_connection(move |connection| {
            let documents = load_documents(connection, &collection)?;
            debug!(collection = %collection, documents = documents.len(), stages = pipeline.len(), "aggregating");
            evaluate::run(documents, &pipeline)
        })
        .await
    }

    async fn insert(&self, collection: &str, documents: Vec<Value>) -> Result<Vec<Value>> {
        let collection = collection.to_owned();
        let max_size = i64::try_from(self.max_collection_bytes).unwrap_or(i64::MAX);
        self.with_connection(move |connection| {
            let transaction = connection.transaction()?;
            transaction.execute(
                "
                insert or ignore into Collection (
                    Collection_Name,
                    MaxSize
                ) values (?, ?)
                ",
                params![&collection, max_size],
            )?;

            let mut inserted = Vec::with_capacity(documents.len());
            {
                let mut add_document = transaction.prepare_cached(
                    "
                    insert into Document (
                        Collection_Name,
                        Document,
                        DocumentSize
                    ) values (?, ?, ?)
                    ",
                )?;
                for document in documents {
                    let text = serde_json::to_string(&document)?;
                    add_document.execute(params![&collection, &text, text.len() as i64])?;
                    inserted.push((transaction.last_insert_rowid(), document));
                }
            }

            let evicted = evict_overflow(&transaction, &collection)?;
            let oldest_kept = oldest_identity(&transaction, &collection)?;
            transaction.commit()?;
            if evicted > 0 {
                debug!(collection = %collection, evicted, "evicted documents from capped collection");
            }
            // a document evicted by its own batch was never stored
            inserted
                .into_iter()
                .filter(|(identity, _)| oldest_kept.is_some_and(|oldest| *identity >= oldest))
                .map(|(identity, document)| with_identity(document, identity))
                .collect()
        })
        .await
    }

    async fn list_collection_names(&self) -> Result<Vec<String>> {
        self.with_connection(|connection| {
            let mut statement = connection.prepare_cached(
                "
                select Collection_Name
                    from Collection
                    order by Collection_Name
                ",
            )?;
            let names = statement
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(names)
        })
        .await
    }

    async fn drop_collection(&self, collection: &str) -> Result<()> {
        let collection = collection.to_owned();
        self.with_connection(move |connection| {
            let transaction = connection.transaction()?;
            transaction.execute("delete from Document where Collection_Name = ?", params![&collection])?;
            transaction.execute("delete from Collection where Collection_Name = ?", params![&collection])?;
            transaction.commit()?;
            Ok(())
        })
        .await
    }

    async fn collection_stats(&self, collection: &str) -> Result<CollectionStats> {
        let collection = collection.to_owned();
        self.with_connection(move |connection| {
            let max_size: Option<i64> = connection
                .query_row(
                    "select MaxSize from Collection where Collection_Name = ?",
                    params![&collection],
                    |row| row.get(0),
                )
                .optional()?;
            let (count, size): (i64, i64) = connection.query_row(
                "
                select count(*), coalesce(sum(DocumentSize), 0)
                    from Document
                    where Collection_Name = ?
                ",
                params![&collection],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            let (count, size) = (count.max(0) as u64, size.max(0) as u64);
            Ok(CollectionStats {
                avg_obj_size: if count == 0 { 0 } else { size / count },
                ns: collection,
                count,
                size,
                capped: max_size.is_some(),
                max_size: max_size.unwrap_or(0).max(0) as u64,
            })
        })
        .await
    }
}
