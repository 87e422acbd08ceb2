//! VectorCAST environment driver.
//!
//! Shells out to the harness binaries (`enviroedg`, `clicast`, `atg`)
//! resolved under `VECTORCAST_DIR`. Every command runs in the environment
//! directory with a bounded timeout; optionally the whole environment is
//! copied into a sandbox first so nothing touches the user's tree.

use std::path::{Path, PathBuf};
use std::process::Output;
use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tokio::sync::OnceCell;
use tracing::{debug, error, warn};

use crate::error::{Error, Result};
use crate::harness::script::{parse_test_script, script_header};
use crate::harness::{Harness, ReductionLevel};
use crate::testcase::TestCase;

/// Driver configuration.
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    /// Copy the environment into a temporary sandbox before touching it.
    pub use_sandbox: bool,
    /// Timeout for ordinary clicast commands.
    pub short_timeout: Duration,
    /// Timeout for the slower generators (ATG, basis path).
    pub long_timeout: Duration,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            use_sandbox: true,
            short_timeout: Duration::from_secs(30),
            long_timeout: Duration::from_secs(60),
        }
    }
}

/// A built (or buildable) VectorCAST environment on disk.
pub struct VectorCastEnv {
    env_name: String,
    env_dir: PathBuf,
    temp_dir: tempfile::TempDir,
    _sandbox: Option<tempfile::TempDir>,
    config: HarnessConfig,
    source_files: OnceCell<Vec<PathBuf>>,
    identifiers: OnceCell<(Vec<String>, bool)>,
    atg: OnceCell<Vec<TestCase>>,
    basis: OnceCell<Vec<TestCase>>,
}

fn marker_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"^#\s+\d+\s+"(.+)""#).expect("static regex"))
}

impl VectorCastEnv {
    /// Open the environment described by an `.env` file.
    pub fn new(env_file_path: impl AsRef<Path>, config: HarnessConfig) -> Result<Self> {
        let env_file_path = env_file_path.as_ref();
        let env_name = env_file_path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.trim_end_matches(".env").to_string())
            .ok_or_else(|| Error::Config(format!("bad env file path: {env_file_path:?}")))?;
        let source_dir = env_file_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        let temp_dir = tempfile::Builder::new()
            .prefix(&format!("vcast_{env_name}_"))
            .tempdir()?;

        let (env_dir, sandbox) = if config.use_sandbox {
            let sandbox = tempfile::tempdir()?;
            copy_dir_recursive(&source_dir, sandbox.path())?;
            (sandbox.path().to_path_buf(), Some(sandbox))
        } else {
            (source_dir, None)
        };

        Ok(Self {
            env_name,
            env_dir,
            temp_dir,
            _sandbox: sandbox,
            config,
            source_files: OnceCell::new(),
            identifiers: OnceCell::new(),
            atg: OnceCell::new(),
            basis: OnceCell::new(),
        })
    }

    fn temp_file(&self, name: &str) -> PathBuf {
        self.temp_dir.path().join(name)
    }

    fn db_path(&self) -> PathBuf {
        self.env_dir.join(&self.env_name).join("master.db")
    }

    /// True once `master.db` exists for this environment.
    pub fn is_built(&self) -> bool {
        self.db_path().exists()
    }

    fn harness_binary(executable: &str) -> PathBuf {
        let exe = if cfg!(windows) {
            format!("{executable}.exe")
        } else {
            executable.to_string()
        };
        match std::env::var_os("VECTORCAST_DIR") {
            Some(dir) if !dir.is_empty() => PathBuf::from(dir).join(exe),
            _ => which::which(&exe).unwrap_or_else(|_| PathBuf::from(exe)),
        }
    }

    /// Run a harness command in the environment directory. `Ok(None)` means
    /// the command timed out; callers decide whether that is recoverable.
    async fn run_command(
        &self,
        executable: &str,
        args: &[&str],
        timeout: Duration,
        extra_env: &[(&str, &str)],
    ) -> Result<Option<Output>> {
        let binary = Self::harness_binary(executable);
        let mut command = tokio::process::Command::new(&binary);
        command.args(args).current_dir(&self.env_dir);
        for (key, value) in extra_env {
            command.env(key, value);
        }
        command.kill_on_drop(true);

        let future = command.output();
        match tokio::time::timeout(timeout, future).await {
            Ok(Ok(output)) => {
                debug!(
                    "command {:?} {:?} exited with {:?}",
                    binary, args, output.status
                );
                Ok(Some(output))
            }
            Ok(Err(e)) => Err(Error::SubprocessComm(format!(
                "failed to run {binary:?}: {e}"
            ))),
            Err(_) => {
                warn!(
                    "command {:?} {:?} timed out after {:?}",
                    binary, args, timeout
                );
                Ok(None)
            }
        }
    }

    /// Build the environment from its `.env` file.
    pub async fn build(&self) -> Result<()> {
        let env_file = format!("{}.env", self.env_name);
        let output = self
            .run_command(
                "enviroedg",
                &[&env_file],
                self.config.short_timeout,
                &[("VCAST_FORCE_OVERWRITE_ENV_DIR", "1")],
            )
            .await?
            .ok_or_else(|| Error::timeout(self.config.short_timeout.as_millis() as u64))?;
        if !output.status.success() {
            return Err(Error::harness(format!(
                "build failed:\n{}",
                stderr_or_stdout(&output)
            )));
        }
        Ok(())
    }

    fn query_source_files(&self) -> Result<Vec<PathBuf>> {
        let db_path = self.db_path();
        if !db_path.exists() {
            return Err(Error::harness(format!(
                "database '{}' not found; is the environment built?",
                db_path.display()
            )));
        }
        let conn = rusqlite::Connection::open(&db_path)?;
        let mut statement = conn.prepare(
            "SELECT path FROM sourcefiles \
             WHERE path NOT LIKE '%vcast_preprocess%' \
               AND path NOT LIKE '%S0000008%' \
               AND (type = 'CPP_FILE' OR type = 'C_FILE')",
        )?;
        let paths = statement
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(paths.into_iter().map(PathBuf::from).collect())
    }

    async fn source_files(&self) -> Result<&[PathBuf]> {
        self.source_files
            .get_or_try_init(|| async { self.query_source_files() })
            .await
            .map(Vec::as_slice)
    }

    async fn template_identifiers(&self) -> Result<Option<Vec<String>>> {
        let template_path = self.temp_file(&format!("identifiers_template_{}.tst", self.env_name));
        let template_str = template_path.to_string_lossy().to_string();
        let output = self
            .run_command(
                "clicast",
                &["-e", &self.env_name, "test", "script", "template", &template_str],
                self.config.short_timeout,
                &[],
            )
            .await?;
        let Some(output) = output else {
            return Ok(None);
        };
        if !output.status.success() {
            return Err(Error::harness(format!(
                "script template failed:\n{}",
                stderr_or_stdout(&output)
            )));
        }
        let content = tokio::fs::read_to_string(&template_path).await?;
        let mut seen = std::collections::HashSet::new();
        let mut identifiers = Vec::new();
        for line in content.lines() {
            if line.starts_with("TEST.VALUE") || line.starts_with("TEST.EXPECTED") {
                if let Some(rest) = line.split_once(':').map(|(_, rest)| rest) {
                    if let Some((identifier, _)) = rest.rsplit_once(':') {
                        if seen.insert(identifier.to_string()) {
                            identifiers.push(identifier.to_string());
                        }
                    }
                }
            }
        }
        if identifiers.is_empty() {
            Ok(None)
        } else {
            Ok(Some(identifiers))
        }
    }

    async fn load_identifiers(&self) -> Result<(Vec<String>, bool)> {
        if let Some(identifiers) = self.template_identifiers().await? {
            return Ok((identifiers, false));
        }
        warn!("failed to generate test script template, scraping identifiers from ATG");
        let mut seen = std::collections::HashSet::new();
        let mut identifiers = Vec::new();
        for test in self.atg_tests().await? {
            for value in test.input_values.iter().chain(&test.expected_values) {
                if seen.insert(value.identifier.clone()) {
                    identifiers.push(value.identifier.clone());
                }
            }
        }
        Ok((identifiers, true))
    }

    async fn load_atg_tests(&self) -> Result<Vec<TestCase>> {
        let atg_path = self.temp_file("atg_for_regular_use.tst");
        let atg_str = atg_path.to_string_lossy().to_string();
        let output = self
            .run_command(
                "atg",
                &["-e", &self.env_name, "--baselining", &atg_str],
                self.config.long_timeout,
                &[],
            )
            .await?;
        let output = match output {
            Some(output) => Some(output),
            None => {
                warn!("ATG with baselining timed out, trying without baselining");
                self.run_command(
                    "atg",
                    &["-e", &self.env_name, &atg_str],
                    self.config.short_timeout,
                    &[],
                )
                .await?
            }
        };
        let Some(output) = output else {
            error!("ATG without baselining also timed out");
            return Ok(Vec::new());
        };
        if !output.status.success() {
            error!("ATG failed:\n{}", stderr_or_stdout(&output));
            return Ok(Vec::new());
        }
        if !atg_path.exists() {
            error!("ATG produced no script file");
            return Ok(Vec::new());
        }
        let content = read_lossy(&atg_path).await?;
        Ok(parse_test_script(&content))
    }

    async fn load_basis_path_tests(&self) -> Result<Vec<TestCase>> {
        let basis_path = self.temp_file("basis.tst");
        let basis_str = basis_path.to_string_lossy().to_string();
        let output = self
            .run_command(
                "clicast",
                &["-e", &self.env_name, "tool", "auto_test", &basis_str],
                self.config.long_timeout,
                &[],
            )
            .await?;
        let Some(output) = output else {
            warn!("basis path generation timed out");
            return Ok(Vec::new());
        };
        if !output.status.success() {
            error!("basis path generation failed:\n{}", stderr_or_stdout(&output));
            return Ok(Vec::new());
        }
        if !basis_path.exists() {
            error!("basis path script file missing");
            return Ok(Vec::new());
        }
        let content = read_lossy(&basis_path).await?;
        Ok(parse_test_script(&content))
    }

    fn tu_path(&self, unit: &str) -> Result<PathBuf> {
        for extension in ["tu.c", "tu.cpp"] {
            let path = self.env_dir.join(&self.env_name).join(format!("{unit}.{extension}"));
            if path.exists() {
                return Ok(path);
            }
        }
        Err(Error::harness(format!(
            "translation unit file not found for {unit}"
        )))
    }

    /// Keep only the lines that preprocessor markers attribute to the
    /// unit's own source file (and, below `High`, to its included headers).
    fn reduce_tu(content: &str, unit_stem: &str, level: ReductionLevel) -> String {
        let mut relevant = Vec::new();
        let mut in_relevant_context = false;
        for line in content.lines() {
            if let Some(captures) = marker_regex().captures(line.trim()) {
                let marker_path = &captures[1];
                let marker_stem = Path::new(marker_path)
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .unwrap_or_default();
                if marker_stem == unit_stem {
                    in_relevant_context = true;
                } else if marker_path.starts_with("vcast_preprocess")
                    || level == ReductionLevel::High
                {
                    in_relevant_context = false;
                }
            } else if in_relevant_context {
                relevant.push(line);
            }
        }
        relevant.join("\n")
    }
}

#[async_trait]
impl Harness for VectorCastEnv {
    fn env_name(&self) -> &str {
        &self.env_name
    }

    async fn units(&self) -> Result<Vec<String>> {
        Ok(self
            .source_files()
            .await?
            .iter()
            .filter_map(|p| p.file_stem().and_then(|s| s.to_str()))
            .map(str::to_string)
            .collect())
    }

    async fn allowed_identifiers(&self) -> Result<(Vec<String>, bool)> {
        self.identifiers
            .get_or_try_init(|| self.load_identifiers())
            .await
            .cloned()
    }

    async fn run_tests(&self, scripts: &[String]) -> Result<String> {
        let units = self.units().await?;
        let mut script = script_header(&self.env_name, &units);
        for block in scripts {
            script.push_str(block);
            script.push('\n');
        }
        let tests = parse_test_script(&script);

        let tst_path = self.temp_file(&format!("temp_tests_{}.tst", self.env_name));
        tokio::fs::write(&tst_path, &script).await?;
        let tst_str = tst_path.to_string_lossy().to_string();

        let timeout_err = || Error::timeout(self.config.short_timeout.as_millis() as u64);

        let mut combined = String::new();
        let output = self
            .run_command(
                "clicast",
                &["-lc", "-e", &self.env_name, "Test", "Script", "Run", &tst_str],
                self.config.short_timeout,
                &[],
            )
            .await?
            .ok_or_else(timeout_err)?;
        combined.push_str(&String::from_utf8_lossy(&output.stdout));

        for test in &tests {
            let output = self
                .run_command(
                    "clicast",
                    &[
                        "-lc", "-e", &self.env_name, "-u", &test.unit_name, "-s",
                        &test.subprogram_name, "-t", &test.test_name, "Execute", "Run",
                    ],
                    self.config.short_timeout,
                    &[],
                )
                .await?
                .ok_or_else(timeout_err)?;
            combined.push_str(&String::from_utf8_lossy(&output.stdout));
        }

        // Remove the loaded tests again so the environment stays clean.
        for test in &tests {
            self.run_command(
                "clicast",
                &[
                    "-lc", "-e", &self.env_name, "-u", &test.unit_name, "-s",
                    &test.subprogram_name, "-t", &test.test_name, "Test", "Delete",
                ],
                self.config.short_timeout,
                &[],
            )
            .await?
            .ok_or_else(timeout_err)?;
        }

        Ok(combined)
    }

    async fn tu_content(&self, level: ReductionLevel) -> Result<String> {
        let units = self.units().await?;
        let unit = units
            .first()
            .ok_or_else(|| Error::harness("environment has no units"))?;
        let tu_path = self.tu_path(unit)?;
        let content = read_lossy(&tu_path).await?;
        if level == ReductionLevel::Low {
            return Ok(content);
        }
        Ok(Self::reduce_tu(&content, unit, level))
    }

    async fn atg_tests(&self) -> Result<Vec<TestCase>> {
        self.atg
            .get_or_try_init(|| self.load_atg_tests())
            .await
            .cloned()
    }

    async fn basis_path_tests(&self) -> Result<Vec<TestCase>> {
        self.basis
            .get_or_try_init(|| self.load_basis_path_tests())
            .await
            .cloned()
    }
}

fn stderr_or_stdout(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    if stderr.trim().is_empty() {
        String::from_utf8_lossy(&output.stdout).into_owned()
    } else {
        stderr.into_owned()
    }
}

async fn read_lossy(path: &Path) -> Result<String> {
    let bytes = tokio::fs::read(path).await?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn copy_dir_recursive(source: &Path, target: &Path) -> Result<()> {
    std::fs::create_dir_all(target)?;
    for entry in std::fs::read_dir(source)? {
        let entry = entry?;
        let destination = target.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_recursive(&entry.path(), &destination)?;
        } else {
            std::fs::copy(entry.path(), &destination)?;
        }
    }
    Ok(())
}
