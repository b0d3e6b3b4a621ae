//! Disposable `PostgreSQL` databases for integration suites.
//!
//! An externally managed server is used when `HERALD_TEST_DATABASE_URL` is set;
//! otherwise a throwaway cluster is initialised from local server binaries.
//! Either way every call gets a freshly created, uniquely named database that
//! is dropped again when the handle goes out of scope.

use std::fs;
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::str::FromStr;
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, anyhow, bail};
use postgres::NoTls;
use url::Url;

/// Environment variable pointing at an existing server for tests.
pub const TEST_DATABASE_URL_ENV: &str = "HERALD_TEST_DATABASE_URL";

const CLUSTER_ROOT: &str = ".herald_test/postgres";
const READY_ATTEMPTS: usize = 30;
const READY_INTERVAL: Duration = Duration::from_millis(200);

/// Handle to a database created for one test.
pub struct TestDatabase {
    connection_string: String,
    admin_url: String,
    name: String,
    cluster: Option<LocalCluster>,
}

impl TestDatabase {
    /// Connection string for the per-test database.
    #[must_use]
    pub fn connection_string(&self) -> &str {
        &self.connection_string
    }

    /// Name of the per-test database.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for TestDatabase {
    fn drop(&mut self) {
        let statement = format!("DROP DATABASE IF EXISTS \"{}\" WITH (FORCE)", self.name);
        let _ = run_admin_statement(&self.admin_url, statement);
        if let Some(cluster) = self.cluster.take() {
            cluster.shutdown();
        }
    }
}

/// Create a fresh database for a test.
///
/// # Errors
///
/// Returns an error when no external server is configured and the local
/// `initdb`/`postgres`/`pg_isready` binaries are missing or fail to start.
/// Suites treat this as a signal to skip.
pub fn start_postgres() -> Result<TestDatabase> {
    match std::env::var(TEST_DATABASE_URL_ENV) {
        Ok(url) => create_database_on(&url, None),
        Err(_) => {
            let cluster = LocalCluster::start()?;
            let url = cluster.base_url();
            create_database_on(&url, Some(cluster))
        }
    }
}

fn create_database_on(base_url: &str, cluster: Option<LocalCluster>) -> Result<TestDatabase> {
    let base = Url::parse(base_url).context("invalid postgres connection url")?;
    let name = unique_database_name();

    let mut admin = base.clone();
    admin.set_path("/postgres");
    let admin_url = admin.to_string();
    run_admin_statement(&admin_url, format!("CREATE DATABASE \"{name}\""))
        .context("failed to create test database")?;

    let mut target = base;
    target.set_path(&format!("/{name}"));

    Ok(TestDatabase {
        connection_string: target.to_string(),
        admin_url,
        name,
        cluster,
    })
}

// The synchronous client must not run on an async runtime thread.
fn run_admin_statement(admin_url: &str, statement: String) -> Result<()> {
    let admin_url = admin_url.to_string();
    thread::spawn(move || -> Result<()> {
        let config = postgres::Config::from_str(&admin_url)?;
        let mut client = config.connect(NoTls)?;
        client.simple_query(&statement)?;
        Ok(())
    })
    .join()
    .map_err(|_| anyhow!("admin statement thread panicked"))?
}

fn unique_database_name() -> String {
    format!("herald_test_{}_{}", std::process::id(), now_nanos())
}

fn now_nanos() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos()
}

/// Server process spawned from local binaries.
struct LocalCluster {
    process: Child,
    data_dir: PathBuf,
    port: u16,
}

impl LocalCluster {
    fn start() -> Result<Self> {
        let initdb = find_binary("initdb")?;
        let server = find_binary("postgres")?;
        let pg_isready = find_binary("pg_isready")?;

        let data_dir = PathBuf::from(CLUSTER_ROOT).join(format!("cluster-{}", now_nanos()));
        fs::create_dir_all(&data_dir)
            .with_context(|| format!("failed to create {}", data_dir.display()))?;
        let data_arg = data_dir
            .to_str()
            .context("cluster directory is not valid utf-8")?
            .to_string();

        let status = Command::new(initdb)
            .args(["-D", &data_arg, "--username=postgres", "--auth=trust"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .context("failed to run initdb")?;
        if !status.success() {
            bail!("initdb exited with {status}");
        }

        let port = free_port()?;
        let process = Command::new(server)
            .args(["-D", &data_arg, "-p", &port.to_string(), "-h", "127.0.0.1"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .context("failed to spawn postgres")?;

        let cluster = Self {
            process,
            data_dir,
            port,
        };
        cluster.wait_until_ready(&pg_isready)?;
        Ok(cluster)
    }

    fn base_url(&self) -> String {
        format!("postgres://postgres@127.0.0.1:{}/postgres", self.port)
    }

    fn wait_until_ready(&self, pg_isready: &Path) -> Result<()> {
        let port = self.port.to_string();
        for _ in 0..READY_ATTEMPTS {
            let ready = Command::new(pg_isready)
                .args(["-h", "127.0.0.1", "-p", &port, "-U", "postgres"])
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .is_ok_and(|status| status.success());
            if ready {
                return Ok(());
            }
            thread::sleep(READY_INTERVAL);
        }
        bail!("postgres on port {port} did not become ready")
    }

    fn shutdown(mut self) {
        let _ = self.process.kill();
        let _ = self.process.wait();
        let _ = fs::remove_dir_all(&self.data_dir);
    }
}

fn find_binary(name: &str) -> Result<PathBuf> {
    let mut dirs = vec![
        PathBuf::from("/usr/lib/postgresql/16/bin"),
        PathBuf::from("/opt/homebrew/opt/postgresql@16/bin"),
    ];
    if let Some(path) = std::env::var_os("PATH") {
        dirs.extend(std::env::split_paths(&path));
    }
    dirs.into_iter()
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.exists())
        .ok_or_else(|| anyhow!("{name} binary is required for Postgres tests"))
}

fn free_port() -> Result<u16> {
    let listener = TcpListener::bind("127.0.0.1:0").context("failed to reserve port")?;
    Ok(listener.local_addr()?.port())
}
