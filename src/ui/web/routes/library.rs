use std::path::Path;
use std::time::UNIX_EPOCH;

use axum::Json;
use axum::extract::State;
use serde::Serialize;
use serde_json::{Value, json};

use crate::ui::web::state::AppState;

/// 播放列表可能落在子目录里，只往下看这么多层。
const MAX_DEPTH: usize = 3;

#[derive(Debug, Clone, Serialize)]
pub(crate) struct LibraryItem {
    pub(crate) name: String,
    pub(crate) rel_path: String,
    pub(crate) ext: String,
    pub(crate) size: u64,
    pub(crate) modified_ms: Option<u64>,
}

pub(crate) async fn api_library(State(state): State<AppState>) -> Json<Value> {
    let root = state.library_root.clone();
    let root_for_task = root.clone();
    let items = tokio::task::spawn_blocking(move || scan_library(&root_for_task))
        .await
        .unwrap_or_default();

    Json(json!({
        "root": root.to_string_lossy(),
        "items": items,
    }))
}

fn is_media_ext(ext: &str) -> bool {
    matches!(
        ext,
        "mp4" | "m4v" | "webm" | "mkv" | "mp3" | "m4a" | "opus" | "ogg" | "wav" | "flac"
    )
}

/// 列出已完成的媒体文件（忽略 `.part` 等临时文件），按修改时间倒序。
pub(crate) fn scan_library(root: &Path) -> Vec<LibraryItem> {
    let mut out = Vec::new();
    let Ok(root_canon) = std::fs::canonicalize(root) else {
        return out;
    };
    walk(&root_canon, &root_canon, 0, &mut out);
    out.sort_by(|a, b| {
        b.modified_ms
            .cmp(&a.modified_ms)
            .then_with(|| a.rel_path.cmp(&b.rel_path))
    });
    out
}

fn walk(root: &Path, dir: &Path, depth: usize, out: &mut Vec<LibraryItem>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let Ok(meta) = entry.metadata() else {
            continue;
        };
        if meta.is_dir() {
            if depth + 1 < MAX_DEPTH {
                walk(root, &path, depth + 1, out);
            }
            continue;
        }
        if !meta.is_file() {
            continue;
        }

        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();
        if !is_media_ext(&ext) {
            continue;
        }

        let rel = path.strip_prefix(root).unwrap_or(&path);
        let rel_path = rel.to_string_lossy().replace('\\', "/");
        let name = path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or(&rel_path)
            .to_string();
        let modified_ms = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as u64);

        out.push(LibraryItem {
            name,
            rel_path,
            ext,
            size: meta.len(),
            modified_ms,
        });
    }
}
