//! Graph, spanning-tree and scene exports.
//!
//! [`GraphExporter`] writes the optimizer's Graphviz descriptions and scene
//! snapshots to an output directory, keeping the numbering of interactive
//! snapshots. Rasterization goes through a [`Renderer`]; a failed render is
//! logged and the run continues with the DOT file alone.

use crate::optimizer::{KeyframeId, KeyframeOptimizer};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;
use tracing::{debug, info, warn};

const SPANTREE_PREFIX: &str = "spantree_";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExportError {
    #[error("failed to write {}: {message}", .path.display())]
    Io { path: PathBuf, message: String },

    #[error("failed to render {}: {message}", .path.display())]
    Render { path: PathBuf, message: String },

    #[error("failed to serialize scene: {0}")]
    Serialize(String),
}

impl ExportError {
    fn io(path: &Path, err: std::io::Error) -> Self {
        ExportError::Io {
            path: path.to_path_buf(),
            message: err.to_string(),
        }
    }
}

/// Rasterizes a DOT file into a PNG image
pub trait Renderer {
    fn render_png(&self, dot_path: &Path, png_path: &Path) -> Result<(), ExportError>;
}

/// Renders with the Graphviz `dot` executable
#[derive(Debug, Clone)]
pub struct GraphvizRenderer {
    program: String,
}

impl Default for GraphvizRenderer {
    fn default() -> Self {
        Self {
            program: "dot".to_string(),
        }
    }
}

impl GraphvizRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use another Graphviz layout program, e.g. `neato`
    pub fn with_program(mut self, program: &str) -> Self {
        self.program = program.to_string();
        self
    }
}

impl Renderer for GraphvizRenderer {
    fn render_png(&self, dot_path: &Path, png_path: &Path) -> Result<(), ExportError> {
        let status = Command::new(&self.program)
            .arg("-Tpng")
            .arg(dot_path)
            .arg("-o")
            .arg(png_path)
            .status()
            .map_err(|e| ExportError::Render {
                path: dot_path.to_path_buf(),
                message: format!("cannot run {}: {e}", self.program),
            })?;
        if !status.success() {
            return Err(ExportError::Render {
                path: dot_path.to_path_buf(),
                message: format!("{} exited with {status}", self.program),
            });
        }
        Ok(())
    }
}

/// Renderer that produces nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopRenderer;

impl Renderer for NoopRenderer {
    fn render_png(&self, _dot_path: &Path, _png_path: &Path) -> Result<(), ExportError> {
        Ok(())
    }
}

/// Files written by one graph export
#[derive(Debug, Clone, PartialEq)]
pub struct GraphFiles {
    pub dot: PathBuf,
    /// Present only when rendering succeeded
    pub png: Option<PathBuf>,
}

pub struct GraphExporter {
    output_dir: PathBuf,
    renderer: Box<dyn Renderer>,
    spantree_counter: u32,
    scene_counter: u32,
    graph_counter: u32,
}

impl GraphExporter {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            renderer: Box::new(GraphvizRenderer::default()),
            spantree_counter: 0,
            scene_counter: 1,
            graph_counter: 0,
        }
    }

    pub fn with_renderer(mut self, renderer: Box<dyn Renderer>) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Write the spanning tree rooted at `kf_id` as `spantree_<n>.dot` and render it.
    ///
    /// Dumps are numbered from 0. Stale `spantree_*` files are removed before the first one.
    pub fn dump_spanning_tree<O: KeyframeOptimizer + ?Sized>(
        &mut self,
        optimizer: &O,
        kf_id: KeyframeId,
    ) -> Result<GraphFiles, ExportError> {
        if self.spantree_counter == 0 {
            self.remove_stale_spanning_trees()?;
        }

        let dot = self
            .output_dir
            .join(format!("{SPANTREE_PREFIX}{:05}.dot", self.spantree_counter));
        self.spantree_counter += 1;
        optimizer
            .dump_spanning_tree(&dot, &[kf_id])
            .map_err(|e| ExportError::io(&dot, e))?;
        let png = self.render(&dot);
        Ok(GraphFiles { dot, png })
    }

    /// Write the scene around `root` as `rba-simul-<n>.scene.yaml`
    pub fn save_scene<O: KeyframeOptimizer + ?Sized>(
        &mut self,
        optimizer: &O,
        root: KeyframeId,
    ) -> Result<PathBuf, ExportError> {
        let path = self
            .output_dir
            .join(format!("rba-simul-{:05}.scene.yaml", self.scene_counter));
        self.scene_counter += 1;

        let yaml = serde_yaml::to_string(&optimizer.scene(root))
            .map_err(|e| ExportError::Serialize(e.to_string()))?;
        fs::write(&path, yaml).map_err(|e| ExportError::io(&path, e))?;
        info!("Saved scene to {}", path.display());
        Ok(path)
    }

    /// Write the keyframe graph as `rba-simul-<n>-full.dot` and render it
    pub fn save_graph_snapshot<O: KeyframeOptimizer + ?Sized>(
        &mut self,
        optimizer: &O,
    ) -> Result<GraphFiles, ExportError> {
        let dot = self
            .output_dir
            .join(format!("rba-simul-{:05}-full.dot", self.graph_counter));
        self.graph_counter += 1;

        optimizer
            .save_graph(&dot, false)
            .map_err(|e| ExportError::io(&dot, e))?;
        let png = self.render(&dot);
        info!("Saved graph to {}", dot.display());
        Ok(GraphFiles { dot, png })
    }

    /// Keyframe-only graph at `path`, plus a PNG with the extension changed
    pub fn save_final_graph<O: KeyframeOptimizer + ?Sized>(
        &self,
        optimizer: &O,
        path: &Path,
    ) -> Result<GraphFiles, ExportError> {
        optimizer
            .save_graph(path, false)
            .map_err(|e| ExportError::io(path, e))?;
        let png = self.render(path);
        info!("Saved final graph to {}", path.display());
        Ok(GraphFiles {
            dot: path.to_path_buf(),
            png,
        })
    }

    /// Graph with landmarks at `path`, DOT only
    pub fn save_final_graph_landmarks<O: KeyframeOptimizer + ?Sized>(
        &self,
        optimizer: &O,
        path: &Path,
    ) -> Result<PathBuf, ExportError> {
        optimizer
            .save_graph(path, true)
            .map_err(|e| ExportError::io(path, e))?;
        info!("Saved final graph with landmarks to {}", path.display());
        Ok(path.to_path_buf())
    }

    fn render(&self, dot: &Path) -> Option<PathBuf> {
        let png = dot.with_extension("png");
        match self.renderer.render_png(dot, &png) {
            Ok(()) => Some(png),
            Err(e) => {
                warn!("{}", e);
                None
            }
        }
    }

    fn remove_stale_spanning_trees(&self) -> Result<(), ExportError> {
        let entries = match fs::read_dir(&self.output_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(ExportError::io(&self.output_dir, e)),
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let stale = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(SPANTREE_PREFIX));
            if stale && path.is_file() {
                debug!("Removing stale {}", path.display());
                fs::remove_file(&path).map_err(|e| ExportError::io(&path, e))?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SolverParams;
    use crate::io::{Measurement, Observation};
    use crate::landmarks::LandmarkClass;
    use crate::optimizer::{KeyframeBundle, RelativeGraph, Scene};
    use tempfile::TempDir;

    struct FailingRenderer;

    impl Renderer for FailingRenderer {
        fn render_png(&self, dot_path: &Path, _png_path: &Path) -> Result<(), ExportError> {
            Err(ExportError::Render {
                path: dot_path.to_path_buf(),
                message: "no graphviz".into(),
            })
        }
    }

    fn small_graph() -> Result<RelativeGraph, Box<dyn std::error::Error>> {
        let mut graph = RelativeGraph::new(SolverParams::default());
        for frame in 0..3u64 {
            let mut bundle = KeyframeBundle::new(frame);
            bundle.push(
                Observation::new(
                    frame,
                    10 + frame,
                    Measurement::RangeBearing2D {
                        range: 1.0,
                        yaw: 0.2,
                    },
                ),
                LandmarkClass::Unknown,
            );
            graph.define_keyframe(&bundle)?;
        }
        Ok(graph)
    }

    fn exporter(dir: &TempDir) -> GraphExporter {
        GraphExporter::new(dir.path()).with_renderer(Box::new(NoopRenderer))
    }

    #[test]
    fn test_spanning_tree_dump_cleans_stale_files_once() -> Result<(), Box<dyn std::error::Error>> {
        let dir = TempDir::new()?;
        fs::write(dir.path().join("spantree_99999.dot"), "stale")?;
        fs::write(dir.path().join("keep.txt"), "keep")?;
        let graph = small_graph()?;
        let mut exporter = exporter(&dir);

        let first = exporter.dump_spanning_tree(&graph, 2)?;
        assert_eq!(first.dot, dir.path().join("spantree_00000.dot"));
        assert!(!dir.path().join("spantree_99999.dot").exists());
        assert!(dir.path().join("keep.txt").exists());
        assert!(fs::read_to_string(&first.dot)?.contains("cluster_root_2"));

        exporter.dump_spanning_tree(&graph, 1)?;
        assert!(first.dot.exists());
        assert!(dir.path().join("spantree_00001.dot").exists());
        Ok(())
    }

    #[test]
    fn test_interactive_counters_are_independent() -> Result<(), Box<dyn std::error::Error>> {
        let dir = TempDir::new()?;
        let graph = small_graph()?;
        let mut exporter = exporter(&dir);

        let scene = exporter.save_scene(&graph, 2)?;
        assert_eq!(scene, dir.path().join("rba-simul-00001.scene.yaml"));
        let snapshot = exporter.save_graph_snapshot(&graph)?;
        assert_eq!(snapshot.dot, dir.path().join("rba-simul-00000-full.dot"));
        assert_eq!(
            snapshot.png,
            Some(dir.path().join("rba-simul-00000-full.png"))
        );
        let second = exporter.save_scene(&graph, 2)?;
        assert_eq!(second, dir.path().join("rba-simul-00002.scene.yaml"));

        let loaded: Scene = serde_yaml::from_str(&fs::read_to_string(&scene)?)?;
        assert_eq!(loaded.root_kf, 2);
        assert_eq!(loaded.keyframes.len(), 3);
        Ok(())
    }

    #[test]
    fn test_snapshot_graph_has_no_landmarks() -> Result<(), Box<dyn std::error::Error>> {
        let dir = TempDir::new()?;
        let graph = small_graph()?;
        let files = exporter(&dir).save_graph_snapshot(&graph)?;
        assert!(!fs::read_to_string(files.dot)?.contains("\"lm"));
        Ok(())
    }

    #[test]
    fn test_final_graphs() -> Result<(), Box<dyn std::error::Error>> {
        let dir = TempDir::new()?;
        let graph = small_graph()?;
        let exporter = exporter(&dir);

        let plain = dir.path().join("final.dot");
        let files = exporter.save_final_graph(&graph, &plain)?;
        assert_eq!(files.png, Some(dir.path().join("final.png")));
        assert!(!fs::read_to_string(&plain)?.contains("\"lm"));

        let with_lms = dir.path().join("final_lms.dot");
        exporter.save_final_graph_landmarks(&graph, &with_lms)?;
        assert!(fs::read_to_string(&with_lms)?.contains("\"lm10\""));
        Ok(())
    }

    #[test]
    fn test_render_failure_is_not_fatal() -> Result<(), Box<dyn std::error::Error>> {
        let dir = TempDir::new()?;
        let graph = small_graph()?;
        let mut exporter = GraphExporter::new(dir.path()).with_renderer(Box::new(FailingRenderer));

        let files = exporter.save_graph_snapshot(&graph)?;
        assert!(files.dot.exists());
        assert_eq!(files.png, None);
        Ok(())
    }
}
