//! The top-level handle: opens a file or an in-memory store, owns the
//! schema/header/plan-cache state shared by every reader, and mints
//! [`crate::transaction::Transaction`]s and [`crate::prepared::PreparedQuery`]
//! handles against it.
//!
//! Concurrency model (spec section 5): at most one write transaction is
//! active on a handle at a time, enforced by `write_lock`; readers opened
//! while a transaction is open do not see its shadow (only the
//! transaction's own `query` does) until `commit` replaces the shared
//! schema/header snapshot.

use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard};

use log::{debug, error, warn};

use crate::agent::{AgentId, AttestationVerifier, Capability, Entitlements, NoopAttestation, NoopEntitlements};
use crate::error::{Error, Result};
use crate::filter::Literal;
use crate::header::{DatabaseHeader, HEADER_SIZE};
use crate::journal;
use crate::prepared::PreparedQuery;
use crate::query::exec::{self, QueryOutput};
use crate::query::planner::PlanCache;
use crate::query::views::{ViewPredicate, ViewRegistry};
use crate::row::{rows_as, Row};
use crate::schema::Schema;
use crate::source::cached::CachedSource;
use crate::source::decrypting::DecryptingSource;
use crate::source::file::FileSource;
use crate::source::null::NullSource;
use crate::source::proxy::ProxySource;
use crate::source::wal::{WalOverlay, WalSource};
use crate::source::{PageSource, WritablePageSource};
use crate::transaction::{Mutation, Transaction};
use crate::transform::{Identity, PageTransform};

/// Whether a file-backed database expects a rollback journal or a WAL
/// file alongside it. Sharc only ever writes the rollback journal; `Wal`
/// here means "expect a `-wal` file and layer it as a read-only overlay",
/// not "write WAL frames on commit".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JournalMode {
    Delete,
    Wal,
}

/// A builder for [`Database::open_with`], in the style of
/// `std::fs::OpenOptions`: a plain constructor-chain rather than a
/// configuration-file format.
pub struct OpenOptions {
    page_size: u32,
    create_if_missing: bool,
    journal_mode: JournalMode,
    transform: Option<Arc<dyn PageTransform>>,
    entitlements: Arc<dyn Entitlements>,
    attestation: Arc<dyn AttestationVerifier>,
    cache_capacity: usize,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            page_size: 4096,
            create_if_missing: false,
            journal_mode: JournalMode::Delete,
            transform: None,
            entitlements: Arc::new(NoopEntitlements),
            attestation: Arc::new(NoopAttestation),
            cache_capacity: 256,
        }
    }
}

impl OpenOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn create_if_missing(mut self, create: bool) -> Self {
        self.create_if_missing = create;
        self
    }

    pub fn journal_mode(mut self, mode: JournalMode) -> Self {
        self.journal_mode = mode;
        self
    }

    pub fn transform(mut self, transform: Arc<dyn PageTransform>) -> Self {
        self.transform = Some(transform);
        self
    }

    pub fn entitlements(mut self, entitlements: Arc<dyn Entitlements>) -> Self {
        self.entitlements = entitlements;
        self
    }

    pub fn attestation(mut self, attestation: Arc<dyn AttestationVerifier>) -> Self {
        self.attestation = attestation;
        self
    }

    pub fn cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    pub fn open(self, path: impl AsRef<Path>) -> Result<Database> {
        Database::open_with(path.as_ref(), self)
    }
}

/// Wraps a writable base source behind a read-only [`PageSource`] view,
/// the shape [`ProxySource`] requires for its retargetable handle -- a
/// `Arc<dyn WritablePageSource>` can't be upcast to `Arc<dyn PageSource>`
/// directly, so this is the small adapter that does it by delegation.
struct ReadOnlyView(Arc<dyn WritablePageSource>);

impl PageSource for ReadOnlyView {
    fn page_size(&self) -> u32 {
        self.0.page_size()
    }

    fn page_count(&self) -> u32 {
        self.0.page_count()
    }

    fn read_page(&self, page_number: u32, out: &mut [u8]) -> Result<()> {
        self.0.read_page(page_number, out)
    }
}

fn journal_path_for(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push("-journal");
    PathBuf::from(name)
}

fn wal_path_for(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push("-wal");
    PathBuf::from(name)
}

fn read_header(source: &dyn PageSource) -> Result<DatabaseHeader> {
    let mut page = vec![0u8; source.page_size().max(HEADER_SIZE as u32) as usize];
    source.read_page(1, &mut page)?;
    let mut bytes = [0u8; HEADER_SIZE];
    bytes.copy_from_slice(&page[..HEADER_SIZE]);
    DatabaseHeader::parse(&bytes)
}

fn bootstrap_page1(source: &dyn WritablePageSource, header: &DatabaseHeader) -> Result<()> {
    source.set_page_count(1)?;
    let mut page = vec![0u8; header.page_size() as usize];
    page[..HEADER_SIZE].copy_from_slice(&header.to_bytes());
    source.write_page(1, &page)
}

pub struct Database {
    write_base: Arc<dyn WritablePageSource>,
    read_proxy: Arc<ProxySource>,
    journal_path: Option<PathBuf>,
    header: Mutex<DatabaseHeader>,
    schema: RwLock<Schema>,
    views: RwLock<ViewRegistry>,
    plan_cache: PlanCache,
    write_lock: Mutex<()>,
    entitlements: Arc<dyn Entitlements>,
    attestation: Arc<dyn AttestationVerifier>,
    commit_observers: Mutex<Vec<Box<dyn Fn(&[Mutation]) + Send + Sync>>>,
}

impl Database {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        OpenOptions::new().open(path)
    }

    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        OpenOptions::new().create_if_missing(true).open(path)
    }

    fn open_with(path: &Path, opts: OpenOptions) -> Result<Self> {
        let exists = path.exists();
        if !exists && !opts.create_if_missing {
            return Err(Error::InvalidFile(format!("no such database file: {}", path.display())));
        }

        let mut std_opts = std::fs::OpenOptions::new();
        std_opts.read(true).write(true);
        if !exists {
            std_opts.create(true);
        }
        let mut file = std_opts.open(path)?;
        let journal_path = journal_path_for(path);
        let journal_exists = journal_path.exists();

        let header = if exists {
            let mut header_bytes = [0u8; HEADER_SIZE];
            file.seek(SeekFrom::Start(0))?;
            file.read_exact(&mut header_bytes)?;
            match DatabaseHeader::parse(&header_bytes) {
                Ok(header) => header,
                // Page 1 is the first page a commit dirties and the last
                // one it writes back (it carries the page count and
                // schema cookie bump), so it's exactly what an interrupted
                // commit leaves half-written. A stale journal sitting next
                // to it means recovery, not failure, is the right call --
                // borrow the journal's own page size to size the page
                // source for now; `read_header` below re-parses the real
                // header once recovery has restored it.
                Err(err) if journal_exists => {
                    warn!("page 1 of {:?} failed to parse ({err}); a rollback journal is present, deferring to recovery", path);
                    let journal_bytes = fs::read(&journal_path)?;
                    let page_size = journal::peek_page_size(&journal_bytes).ok_or_else(|| {
                        Error::InvalidFile(format!(
                            "page 1 of {:?} is corrupt and its rollback journal is unreadable",
                            path
                        ))
                    })?;
                    let mut header = DatabaseHeader::default();
                    header.set_page_size(page_size);
                    header
                }
                Err(err) => return Err(err),
            }
        } else {
            let mut header = DatabaseHeader::default();
            header.set_page_size(opts.page_size);
            header
        };

        let physical_page_size = match &opts.transform {
            Some(t) => t.transformed_page_size(header.page_size()),
            None => header.page_size(),
        };
        let file_len = file.seek(SeekFrom::End(0))?;
        let page_count = if exists {
            (file_len / physical_page_size as u64).max(1) as u32
        } else {
            1
        };

        let file_source = FileSource::new(file, physical_page_size, page_count);

        let write_base: Arc<dyn WritablePageSource> = match opts.transform.clone() {
            Some(transform) => {
                let decrypting = DecryptingSource::new(file_source, transform, header.page_size());
                Arc::new(CachedSource::new(decrypting, opts.cache_capacity))
            }
            None => {
                let decrypting = DecryptingSource::new(file_source, Identity, header.page_size());
                Arc::new(CachedSource::new(decrypting, opts.cache_capacity))
            }
        };

        if journal_exists {
            journal::recover(&journal_path, write_base.as_ref())?;
        }

        if !exists {
            bootstrap_page1(write_base.as_ref(), &header)?;
        }

        let wal_path = wal_path_for(path);
        let wal_overlay = if opts.journal_mode == JournalMode::Wal && wal_path.exists() {
            let bytes = std::fs::read(&wal_path)?;
            match WalOverlay::parse(&bytes, header.page_size()) {
                Ok(overlay) => Some(overlay),
                Err(err) => {
                    warn!("ignoring unreadable wal file {:?}: {err}", wal_path);
                    None
                }
            }
        } else {
            None
        };

        let read_target: Arc<dyn PageSource> = match wal_overlay {
            Some(overlay) => Arc::new(WalSource::new(ReadOnlyView(write_base.clone()), overlay)),
            None => Arc::new(ReadOnlyView(write_base.clone())),
        };
        let read_proxy = Arc::new(ProxySource::new(read_target));

        let header = read_header(read_proxy.as_ref())?;
        let schema = Schema::load(read_proxy.as_ref())?;

        debug!("opened database {:?}: page_size={}, page_count={}", path, header.page_size(), header.page_count());

        Ok(Self {
            write_base,
            read_proxy,
            journal_path: Some(journal_path),
            header: Mutex::new(header),
            schema: RwLock::new(schema),
            views: RwLock::new(ViewRegistry::new()),
            plan_cache: PlanCache::new(),
            write_lock: Mutex::new(()),
            entitlements: opts.entitlements,
            attestation: opts.attestation,
            commit_observers: Mutex::new(Vec::new()),
        })
    }

    /// An ephemeral database with no backing file: every page lives in a
    /// [`NullSource`], and there is no rollback journal to write (a crash
    /// just loses the process's memory, there is nothing on disk to
    /// recover from).
    pub fn create_in_memory(page_size: u32) -> Result<Self> {
        let mut header = DatabaseHeader::default();
        header.set_page_size(page_size);

        let null_source = Arc::new(NullSource::new(page_size));
        bootstrap_page1(null_source.as_ref(), &header)?;

        let write_base: Arc<dyn WritablePageSource> = null_source;
        let read_target: Arc<dyn PageSource> = Arc::new(ReadOnlyView(write_base.clone()));
        let read_proxy = Arc::new(ProxySource::new(read_target));
        let schema = Schema::load(read_proxy.as_ref())?;

        Ok(Self {
            write_base,
            read_proxy,
            journal_path: None,
            header: Mutex::new(header),
            schema: RwLock::new(schema),
            views: RwLock::new(ViewRegistry::new()),
            plan_cache: PlanCache::new(),
            write_lock: Mutex::new(()),
            entitlements: Arc::new(NoopEntitlements),
            attestation: Arc::new(NoopAttestation),
            commit_observers: Mutex::new(Vec::new()),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::create_in_memory(4096)
    }

    /// Opens a file-backed database on behalf of a specific agent
    /// identity: the attestation verifier runs before any byte of the
    /// file is trusted, and the resulting handle enforces `entitlements`
    /// for every `prepare_for_agent`/`write_for_agent` call made against it.
    pub fn open_for_agent(path: impl AsRef<Path>, opts: OpenOptions, agent: &AgentId) -> Result<Self> {
        opts.attestation.verify(agent)?;
        Self::open_with(path.as_ref(), opts)
    }

    pub(crate) fn read_source(&self) -> &ProxySource {
        self.read_proxy.as_ref()
    }

    pub(crate) fn write_base(&self) -> &dyn WritablePageSource {
        self.write_base.as_ref()
    }

    pub(crate) fn journal_path(&self) -> Option<&Path> {
        self.journal_path.as_deref()
    }

    pub(crate) fn plan_cache(&self) -> &PlanCache {
        &self.plan_cache
    }

    pub(crate) fn views(&self) -> RwLockReadGuard<'_, ViewRegistry> {
        self.views.read().expect("view registry lock poisoned")
    }

    pub(crate) fn schema(&self) -> RwLockReadGuard<'_, Schema> {
        self.schema.read().expect("schema lock poisoned")
    }

    pub(crate) fn replace_schema(&self, schema: Schema, header: DatabaseHeader) {
        *self.schema.write().expect("schema lock poisoned") = schema;
        *self.header.lock().expect("header mutex poisoned") = header;
    }

    /// Invokes every registered commit observer with a snapshot of this
    /// transaction's `(table_name, rowid)` mutations. A panicking
    /// observer is caught and logged rather than propagated: a buggy
    /// observer must never retroactively fail an already-committed
    /// transaction (spec design note on observer notifications).
    pub(crate) fn notify_commit(&self, mutations: &[Mutation]) {
        let observers = self.commit_observers.lock().expect("commit observers lock poisoned");
        for observer in observers.iter() {
            if std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| observer(mutations))).is_err() {
                error!("commit observer panicked; ignoring");
            }
        }
    }

    pub fn register_commit_observer<F>(&self, observer: F)
    where
        F: Fn(&[Mutation]) + Send + Sync + 'static,
    {
        self.commit_observers
            .lock()
            .expect("commit observers lock poisoned")
            .push(Box::new(observer));
    }

    pub fn register_view(&self, name: impl Into<String>, base_table: impl Into<String>, filter: Option<ViewPredicate>) {
        self.views.write().expect("view registry lock poisoned").register(name, base_table, filter);
    }

    pub fn deregister_view(&self, name: &str) -> bool {
        self.views.write().expect("view registry lock poisoned").deregister(name)
    }

    /// Begins a write transaction. Only one may be active on a handle at
    /// a time; a second call blocks-fails immediately with
    /// `Error::InvalidOperation` rather than queueing, matching the
    /// "at most one active write transaction per handle" rule (spec
    /// section 5) -- an embedder wanting serialized writers must do so
    /// itself, e.g. with its own external mutex around `begin_transaction`.
    /// The database's logical page size, in bytes.
    pub fn page_size(&self) -> u32 {
        self.header.lock().expect("header mutex poisoned").page_size()
    }

    /// The total number of pages currently allocated, including freelist
    /// pages -- the same count stored in the on-disk header.
    pub fn page_count(&self) -> u32 {
        self.header.lock().expect("header mutex poisoned").page_count()
    }

    /// The current schema cookie, bumped on every committed DDL
    /// statement; callers comparing two snapshots across a transaction
    /// use this to detect whether the schema changed.
    pub fn schema_cookie(&self) -> u32 {
        self.header.lock().expect("header mutex poisoned").schema_cookie()
    }

    pub fn begin_transaction(&self) -> Result<Transaction<'_>> {
        let guard = self
            .write_lock
            .try_lock()
            .map_err(|_| Error::InvalidOperation("a write transaction is already active on this handle".into()))?;
        let header = self.header.lock().expect("header mutex poisoned").clone();
        let schema = self.schema.read().expect("schema lock poisoned").clone();
        Ok(Transaction::new(self, guard, header, schema))
    }

    pub fn query(&self, sql: &str) -> Result<QueryOutput> {
        self.query_with_params(sql, &std::collections::HashMap::new())
    }

    pub fn query_with_params(&self, sql: &str, params: &std::collections::HashMap<String, Literal>) -> Result<QueryOutput> {
        let intent = crate::query::parser::parse(sql)?;
        let schema = self.schema.read().expect("schema lock poisoned");
        let views = self.views();
        let plan = self.plan_cache.get_or_compile(&intent, &schema, &views)?;
        drop(views);
        drop(schema);
        exec::execute(&plan, self.read_source(), params)
    }

    pub fn query_as<T: Row>(&self, sql: &str) -> Result<Vec<T>> {
        match self.query(sql)? {
            QueryOutput::Rows { columns, rows } => rows_as(&columns, &rows),
            QueryOutput::Explain(_) => Err(Error::InvalidOperation("EXPLAIN output cannot be hydrated into a row type".into())),
        }
    }

    pub fn prepare(&self, sql: &str) -> Result<PreparedQuery> {
        PreparedQuery::new(sql)
    }

    /// Like [`Self::prepare`], but first consults `entitlements` for read
    /// access to `table`. The check runs once, when the handle is
    /// minted; an entitlement change takes effect for handles prepared
    /// afterwards, not ones already outstanding.
    pub fn prepare_for_agent(&self, agent: &AgentId, table: &str, sql: &str) -> Result<PreparedQuery> {
        self.entitlements.check(agent, table, Capability::Read)?;
        PreparedQuery::new(sql)
    }

    /// Begins a write transaction on behalf of an agent, after checking
    /// write entitlement on `table`.
    pub fn write_for_agent(&self, agent: &AgentId, table: &str) -> Result<Transaction<'_>> {
        self.entitlements.check(agent, table, Capability::Write)?;
        self.begin_transaction()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_in_memory_starts_with_an_empty_schema() {
        let db = Database::create_in_memory(4096).unwrap();
        assert!(db.schema.read().unwrap().tables.is_empty());
    }

    #[test]
    fn only_one_write_transaction_may_be_active_at_once() {
        let db = Database::create_in_memory(4096).unwrap();
        let _first = db.begin_transaction().unwrap();
        assert!(db.begin_transaction().is_err());
    }

    #[test]
    fn a_second_transaction_may_begin_after_the_first_commits() {
        let db = Database::create_in_memory(4096).unwrap();
        {
            let txn = db.begin_transaction().unwrap();
            txn.commit().unwrap();
        }
        assert!(db.begin_transaction().is_ok());
    }

    #[test]
    fn commit_observer_sees_mutations_after_commit() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let db = Database::create_in_memory(4096).unwrap();
        let seen = Arc::new(AtomicUsize::new(0));
        let seen2 = seen.clone();
        db.register_commit_observer(move |mutations| {
            seen2.store(mutations.len(), Ordering::SeqCst);
        });

        let mut txn = db.begin_transaction().unwrap();
        txn.execute_ddl("CREATE TABLE t (id INTEGER PRIMARY KEY, v TEXT)").unwrap();
        txn.insert("t", 1, &[crate::record::ColumnValue::Null, crate::record::ColumnValue::Text(b"x")])
            .unwrap();
        txn.commit().unwrap();

        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }
}
