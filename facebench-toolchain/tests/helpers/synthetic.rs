//! Synthetic database generator
//!
//! Writes a file-list manifest plus one raw JSON array per file into a
//! temporary directory. Every client has a random centroid; its samples are
//! the centroid plus bounded uniform noise, so identities are well separated.

use facebench_toolchain::components::databases::FileListDatabase;
use facebench_toolchain::components::Database;
use facebench_toolchain::types::Array;
use facebench_toolchain::{DirectoryLayout, ExperimentConfig};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Shape of a synthetic experiment
#[derive(Debug, Clone)]
pub struct SyntheticSpec {
    pub seed: u64,
    pub dims: usize,
    pub noise: f64,
    pub world_clients: usize,
    pub world_images: usize,
    pub dev_clients: usize,
    pub enroll_images: usize,
    pub probe_images: usize,
    /// T-norm cohort clients, one T-model each
    pub t_clients: usize,
    pub t_images: usize,
    /// Z-files per T-model client
    pub z_per_t_client: usize,
    /// Z-only clients and their file count
    pub z_other_clients: usize,
    pub z_per_other_client: usize,
}

impl SyntheticSpec {
    /// 40 identities × 10 images, half enrolled, half probed; no cohort
    pub fn att() -> Self {
        Self {
            seed: 7,
            dims: 8,
            noise: 0.5,
            world_clients: 10,
            world_images: 4,
            dev_clients: 40,
            enroll_images: 5,
            probe_images: 5,
            t_clients: 0,
            t_images: 0,
            z_per_t_client: 0,
            z_other_clients: 0,
            z_per_other_client: 0,
        }
    }

    /// 5 models, 10 probes, 5 T-models, 20 Z-files (2 per T-model client)
    pub fn zt_cohort() -> Self {
        Self {
            seed: 11,
            dims: 6,
            noise: 1.5,
            world_clients: 4,
            world_images: 3,
            dev_clients: 5,
            enroll_images: 2,
            probe_images: 2,
            t_clients: 5,
            t_images: 2,
            z_per_t_client: 2,
            z_other_clients: 5,
            z_per_other_client: 2,
        }
    }

    /// A few identities, for driver behavior tests
    pub fn small() -> Self {
        Self {
            seed: 3,
            dims: 4,
            noise: 0.3,
            world_clients: 3,
            world_images: 3,
            dev_clients: 4,
            enroll_images: 2,
            probe_images: 2,
            t_clients: 2,
            t_images: 2,
            z_per_t_client: 1,
            z_other_clients: 2,
            z_per_other_client: 2,
        }
    }
}

/// One generated file
#[derive(Debug, Clone)]
pub struct SyntheticFile {
    pub id: String,
    pub path: String,
    pub client: String,
    pub purpose: &'static str,
    pub models: Vec<String>,
    pub data: Vec<f64>,
}

/// A generated experiment rooted in its own temporary directory
pub struct SyntheticDb {
    pub root: TempDir,
    pub manifest: PathBuf,
    pub spec: SyntheticSpec,
    pub files: Vec<SyntheticFile>,
    /// model id → client id, for both cohorts
    pub model_clients: BTreeMap<String, String>,
    pub t_models: Vec<String>,
    pub models: Vec<String>,
}

impl SyntheticDb {
    pub fn create(spec: SyntheticSpec) -> Self {
        let root = TempDir::new().expect("temp dir");
        let mut rng = StdRng::seed_from_u64(spec.seed);
        let mut files = Vec::new();
        let mut model_clients = BTreeMap::new();
        let mut models = Vec::new();
        let mut t_models = Vec::new();

        let centroid = |rng: &mut StdRng| -> Vec<f64> {
            (0..spec.dims).map(|_| rng.gen_range(-10.0..10.0)).collect()
        };
        let sample = |rng: &mut StdRng, c: &[f64]| -> Vec<f64> {
            c.iter().map(|v| v + rng.gen_range(-spec.noise..spec.noise)).collect()
        };
        let push = |files: &mut Vec<SyntheticFile>,
                        client: &str,
                        kind: &str,
                        n: usize,
                        purpose: &'static str,
                        models: Vec<String>,
                        data: Vec<f64>| {
            files.push(SyntheticFile {
                id: format!("{}_{}{}", client, kind, n),
                path: format!("{}/{}{}", client, kind, n),
                client: client.to_string(),
                purpose,
                models,
                data,
            });
        };

        for w in 0..spec.world_clients {
            let client = format!("w{:02}", w);
            let c = centroid(&mut rng);
            for i in 0..spec.world_images {
                let data = sample(&mut rng, &c);
                push(&mut files, &client, "world", i, "world", vec![], data);
            }
        }

        for d in 0..spec.dev_clients {
            let client = format!("c{:02}", d);
            let model = format!("m_{}", client);
            model_clients.insert(model.clone(), client.clone());
            models.push(model.clone());
            let c = centroid(&mut rng);
            for i in 0..spec.enroll_images {
                let data = sample(&mut rng, &c);
                push(&mut files, &client, "enroll", i, "enroll", vec![model.clone()], data);
            }
            for i in 0..spec.probe_images {
                let data = sample(&mut rng, &c);
                push(&mut files, &client, "probe", i, "probe", vec![], data);
            }
        }

        for t in 0..spec.t_clients {
            let client = format!("t{:02}", t);
            let model = format!("tm_{}", client);
            model_clients.insert(model.clone(), client.clone());
            t_models.push(model.clone());
            let c = centroid(&mut rng);
            for i in 0..spec.t_images {
                let data = sample(&mut rng, &c);
                push(&mut files, &client, "tenroll", i, "tprobe", vec![model.clone()], data);
            }
            for i in 0..spec.z_per_t_client {
                let data = sample(&mut rng, &c);
                push(&mut files, &client, "z", i, "znorm", vec![], data);
            }
        }

        for z in 0..spec.z_other_clients {
            let client = format!("z{:02}", z);
            let c = centroid(&mut rng);
            for i in 0..spec.z_per_other_client {
                let data = sample(&mut rng, &c);
                push(&mut files, &client, "z", i, "znorm", vec![], data);
            }
        }

        let raw_dir = root.path().join("raw");
        for file in &files {
            let path = raw_dir.join(format!("{}.json", file.path));
            std::fs::create_dir_all(path.parent().expect("parent")).expect("raw dir");
            let bytes = serde_json::to_vec(&Array::vector(file.data.clone())).expect("encode");
            std::fs::write(&path, bytes).expect("raw file");
        }

        let manifest = root.path().join("database.toml");
        std::fs::write(&manifest, manifest_text(&files, &model_clients, &t_models)).expect("manifest");

        Self {
            root,
            manifest,
            spec,
            files,
            model_clients,
            t_models,
            models,
        }
    }

    pub fn database(&self) -> Box<dyn Database> {
        Box::new(FileListDatabase::load(&self.manifest).expect("manifest loads"))
    }

    pub fn layout(&self) -> DirectoryLayout {
        DirectoryLayout::new(self.root.path().join("temp"), self.root.path().join("user"))
    }

    /// Fast-retry configuration rooted in this experiment's directory
    pub fn config(&self) -> ExperimentConfig {
        let mut config = ExperimentConfig::new(self.layout());
        config.retry.backoff_ms = 1;
        config
    }

    pub fn raw_path(&self, file: &SyntheticFile) -> PathBuf {
        self.root.path().join("raw").join(format!("{}.json", file.path))
    }

    pub fn files_with(&self, purpose: &str) -> Vec<&SyntheticFile> {
        self.files.iter().filter(|f| f.purpose == purpose).collect()
    }

    pub fn world_size(&self) -> usize {
        self.files_with("world").len()
    }

    /// Every file the per-file stages touch for the dev group
    pub fn per_file_count(&self, zt_norm: bool) -> usize {
        self.files
            .iter()
            .filter(|f| zt_norm || !matches!(f.purpose, "tprobe" | "znorm"))
            .count()
    }
}

fn manifest_text(
    files: &[SyntheticFile],
    model_clients: &BTreeMap<String, String>,
    t_models: &[String],
) -> String {
    let mut text = String::from("original_directory = \"raw\"\noriginal_extension = \".json\"\n");
    for (model, client) in model_clients {
        let cohort = if t_models.contains(model) {
            "t_models"
        } else {
            "models"
        };
        let _ = write!(
            text,
            "\n[[models]]\nid = \"{}\"\nclient = \"{}\"\ngroup = \"dev\"\ncohort = \"{}\"\n",
            model, client, cohort
        );
    }
    for file in files {
        let group = if file.purpose == "world" { "world" } else { "dev" };
        let models = file
            .models
            .iter()
            .map(|m| format!("\"{}\"", m))
            .collect::<Vec<_>>()
            .join(", ");
        let _ = write!(
            text,
            "\n[[files]]\nid = \"{}\"\npath = \"{}\"\nclient = \"{}\"\npurpose = \"{}\"\ngroup = \"{}\"\nmodels = [{}]\n",
            file.id, file.path, file.client, file.purpose, group, models
        );
    }
    text
}

/// Recursively list regular files below a directory
pub fn list_files(dir: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let Ok(entries) = std::fs::read_dir(dir) else {
        return found;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            found.extend(list_files(&path));
        } else {
            found.push(path);
        }
    }
    found.sort();
    found
}
