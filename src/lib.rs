pub mod core;
pub mod connection;
pub mod backend;
pub mod query;
pub mod search;
pub mod stats;
pub mod schema;
pub mod reload;

pub use crate::core::config::Config;
pub use crate::core::database::Database;
pub use crate::core::error::{Error, ErrorKind, Result};
pub use crate::search::table::{SearchTable, TableDescriptor};

/*
┌────────────────────────────────────────────────────────────────────────────────────────────┐
│                              RELSTORE STRUCT ARCHITECTURE                                   │
└────────────────────────────────────────────────────────────────────────────────────────────┘

┌─────────────────────────────────────── CORE LAYER ──────────────────────────────────────────┐
│                                                                                              │
│  ┌────────────────────────────────────────────────────────────────────────────────────┐    │
│  │                               struct Database                                       │    │
│  │  ┌──────────────────────────────────────────────────────────────────────────────┐ │    │
│  │  │ conn: Arc<ConnectionManager>                    // The one session          │ │    │
│  │  │ tables: RwLock<BTreeMap<String, Arc<SearchTable>>> // Registry from meta_tables│ │    │
│  │  └──────────────────────────────────────────────────────────────────────────────┘ │    │
│  └────────────────────────────────────────────────────────────────────────────────────┘    │
│                                                                                              │
│  ┌──────────────────┐  ┌──────────────────┐  ┌───────────────────────────────────────┐    │
│  │ struct Config    │  │ struct Sql       │  │ enum SqlValue                         │    │
│  │ • host, port     │  │ • pieces: Vec<   │  │ • Null / Bool / Int / Float           │    │
│  │ • dbname, user   │  │   Piece>         │  │ • Text / Array / Json                 │    │
│  │ • slow_cutoff    │  └──────────────────┘  └───────────────────────────────────────┘    │
│  │ • count_cutoff   │  ┌──────────────────┐  ┌───────────────────────────────────────┐    │
│  │ • copy_separator │  │ struct Error     │  │ struct ResultSet                      │    │
│  └──────────────────┘  │ • kind           │  │ • columns, rows: Vec<TextRow>         │    │
│                        │ • context        │  │ • rows_affected                       │    │
│                        │ • statement      │  └───────────────────────────────────────┘    │
│                        └──────────────────┘                                                 │
└──────────────────────────────────────────────────────────────────────────────────────────────┘

┌─────────────────────────────────── CONNECTION LAYER ────────────────────────────────────────┐
│                                                                                              │
│  ┌────────────────────────────────────────────────────────────────────────────────────┐    │
│  │                         struct ConnectionManager                                    │    │
│  │  ┌──────────────────────────────────────────────────────────────────────────────┐ │    │
│  │  │ connector: Box<dyn Connector>           // Opens sessions                   │ │    │
│  │  │ session: Mutex<Box<dyn Session>>        // Postgres or scripted             │ │    │
│  │  │ depth: AtomicUsize                      // DelayCommit nesting              │ │    │
│  │  │ generation: AtomicU64                   // Bumped on reconnect              │ │    │
│  │  │ read_only: AtomicBool                   // pg_is_in_recovery() at connect   │ │    │
│  │  │ listeners: Mutex<Vec<Weak<dyn ConnectionListener>>>                     │ │    │
│  │  └──────────────────────────────────────────────────────────────────────────────┘ │    │
│  └────────────────────────────────────────────────────────────────────────────────────┘    │
│                                                                                              │
│  ┌────────────────────────┐  ┌─────────────────────────┐  ┌────────────────────────┐      │
│  │ struct DelayCommit     │  │ struct NamedCursor      │  │ enum LockScope         │      │
│  │ • commits at depth 0   │  │ • server-side batches   │  │ • Update / Delete      │      │
│  │ • rolls back on drop   │  │ • closed explicitly     │  │ • Insert / Index / All │      │
│  └────────────────────────┘  └─────────────────────────┘  └────────────────────────┘      │
└──────────────────────────────────────────────────────────────────────────────────────────────┘

┌────────────────────────────────────── QUERY LAYER ──────────────────────────────────────────┐
│                                                                                              │
│  JSON description ──> QueryParser ──> enum Query ──> QueryTranslator ──> Sql predicate     │
│                          │                                  │                               │
│                          └── ColumnType dispatch            └── compile_raw ($raw)         │
│                                                                                              │
│  QueryCache: LRU of compiled predicates, keyed by canonical JSON                           │
└──────────────────────────────────────────────────────────────────────────────────────────────┘

┌───────────────────────────────────── RELATIONSHIPS ─────────────────────────────────────────┐
│                                                                                              │
│  Database ──owns──> ConnectionManager ──drives──> Session                                  │
│     │                                                                                       │
│     ├──registers──> SearchTable ──compiles_with──> QueryTranslator                         │
│     │                    │                                                                  │
│     │                    ├──counts_through──> StatsEngine ──caches_in──> {t}_counts/_stats  │
│     │                    │                                                                  │
│     │                    └──reloads_through──> _tmp tables ──swap──> live + _oldN backup    │
│     │                                                                                       │
│     └──schema()──> SchemaManager ──records_in──> MetaCatalog (meta_* and meta_*_hist)       │
│                                                                                              │
└──────────────────────────────────────────────────────────────────────────────────────────────┘
*/
