//! 下载 yt-dlp 官方发布的独立可执行文件到 `<data_dir>/bin/`。
//!
//! - 通过 GitHub Releases API 取最新版本
//! - 按平台/架构选择资产
//! - 使用同一 Release 中的 `SHA2-256SUMS` 校验
//! - 先写临时文件，校验通过后再原子替换

use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, USER_AGENT};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tracing::{info, warn};

use super::ytdlp::managed_path;

const LATEST_RELEASE_URL: &str = "https://api.github.com/repos/yt-dlp/yt-dlp/releases/latest";
const CHECKSUM_ASSET: &str = "SHA2-256SUMS";
const UA: &str = concat!("media-grab/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Deserialize)]
struct ReleaseInfo {
    tag_name: Option<String>,
    assets: Vec<ReleaseAsset>,
}

#[derive(Debug, Deserialize)]
struct ReleaseAsset {
    name: String,
    size: Option<u64>,
    browser_download_url: String,
}

/// 当前平台对应的 Release 资产名；不支持的平台返回 None。
pub fn asset_name_for(os: &str, arch: &str) -> Option<&'static str> {
    match (os, arch) {
        ("windows", "x86_64") => Some("yt-dlp.exe"),
        ("windows", "x86") => Some("yt-dlp_x86.exe"),
        ("windows", "aarch64") => Some("yt-dlp_arm64.exe"),
        ("macos", _) => Some("yt-dlp_macos"),
        ("linux", "x86_64") => Some("yt-dlp_linux"),
        ("linux", "aarch64") => Some("yt-dlp_linux_aarch64"),
        ("linux", "arm") => Some("yt-dlp_linux_armv7l"),
        _ => None,
    }
}

/// 从 `SHA2-256SUMS`（`<hash>  <file>` 每行一条）中取出指定文件的哈希。
pub fn checksum_for(sums: &str, asset: &str) -> Option<String> {
    sums.lines().find_map(|line| {
        let mut parts = line.split_whitespace();
        let hash = parts.next()?;
        let name = parts.next()?.trim_start_matches('*');
        (name == asset && hash.len() == 64 && hash.chars().all(|c| c.is_ascii_hexdigit()))
            .then(|| hash.to_ascii_lowercase())
    })
}

#[cfg(feature = "docker")]
pub fn install_managed(_data_dir: &Path) -> Result<PathBuf> {
    Err(anyhow!("容器镜像自带 yt-dlp，不支持 --install-extractor"))
}

#[cfg(not(feature = "docker"))]
pub fn install_managed(data_dir: &Path) -> Result<PathBuf> {
    let asset_name = asset_name_for(std::env::consts::OS, std::env::consts::ARCH).ok_or_else(
        || {
            anyhow!(
                "no yt-dlp build for {}/{}",
                std::env::consts::OS,
                std::env::consts::ARCH
            )
        },
    )?;

    info!(target: "extractor", "正在获取 yt-dlp 最新版本信息…");
    let client = build_http_client()?;
    let release = fetch_latest_release(&client)?;
    let tag = release.tag_name.as_deref().unwrap_or("?");

    let asset = release
        .assets
        .iter()
        .find(|a| a.name == asset_name)
        .ok_or_else(|| anyhow!("release {tag} has no asset {asset_name}"))?;

    let expected = match release.assets.iter().find(|a| a.name == CHECKSUM_ASSET) {
        Some(sums) => {
            let text = client
                .get(&sums.browser_download_url)
                .header(USER_AGENT, UA)
                .send()
                .context("download checksums")?
                .error_for_status()
                .context("checksums status")?
                .text()
                .context("read checksums")?;
            checksum_for(&text, asset_name)
        }
        None => None,
    };
    if expected.is_none() {
        warn!(target: "extractor", "Release 未提供 {asset_name} 的 SHA256，跳过校验");
    }

    let target = managed_path(data_dir);
    let parent = target
        .parent()
        .ok_or_else(|| anyhow!("invalid install path {}", target.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;

    info!(target: "extractor", tag, asset = asset_name, "开始下载 yt-dlp");
    let tmp = download_verified(&client, asset, parent, expected.as_deref())?;
    tmp.persist(&target)
        .with_context(|| format!("install {}", target.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perm = fs::metadata(&target)?.permissions();
        perm.set_mode(0o755);
        fs::set_permissions(&target, perm).context("chmod yt-dlp")?;
    }

    info!(target: "extractor", path = %target.display(), "yt-dlp 安装完成");
    Ok(target)
}

fn build_http_client() -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(300))
        .connect_timeout(Duration::from_secs(15))
        .build()
        .context("init http client")
}

fn fetch_latest_release(client: &Client) -> Result<ReleaseInfo> {
    client
        .get(LATEST_RELEASE_URL)
        .header(ACCEPT, "application/vnd.github+json")
        .header(USER_AGENT, UA)
        .send()
        .context("request latest release")?
        .error_for_status()
        .context("latest release status")?
        .json::<ReleaseInfo>()
        .context("parse latest release json")
}

fn download_verified(
    client: &Client,
    asset: &ReleaseAsset,
    dir: &Path,
    expected: Option<&str>,
) -> Result<NamedTempFile> {
    let mut resp = client
        .get(&asset.browser_download_url)
        .header(USER_AGENT, UA)
        .send()
        .with_context(|| format!("download asset: {}", asset.browser_download_url))?
        .error_for_status()
        .context("download status")?;

    let total = resp.content_length().or(asset.size).unwrap_or(0);
    let pb = (total > 0).then(|| {
        let pb = ProgressBar::new(total);
        if let Ok(style) =
            ProgressStyle::with_template("{msg} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})")
        {
            pb.set_style(style.progress_chars("##-"));
        }
        pb.set_message(format!("Downloading {}", asset.name));
        pb
    });

    let mut tmp = NamedTempFile::new_in(dir).context("create temp file")?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = resp.read(&mut buf).context("read download stream")?;
        if n == 0 {
            break;
        }
        tmp.write_all(&buf[..n]).context("write temp file")?;
        hasher.update(&buf[..n]);
        if let Some(pb) = pb.as_ref() {
            pb.inc(n as u64);
        }
    }
    tmp.flush().context("flush temp file")?;
    if let Some(pb) = pb {
        pb.finish_and_clear();
    }

    let actual = hex::encode(hasher.finalize());
    if let Some(expected) = expected
        && !actual.eq_ignore_ascii_case(expected)
    {
        return Err(anyhow!(
            "SHA256 校验失败：{} 的哈希 {actual} 与期望 {expected} 不符",
            asset.name
        ));
    }
    Ok(tmp)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_standalone_linux_build() {
        assert_eq!(asset_name_for("linux", "x86_64"), Some("yt-dlp_linux"));
        assert_eq!(asset_name_for("macos", "aarch64"), Some("yt-dlp_macos"));
        assert_eq!(asset_name_for("freebsd", "x86_64"), None);
    }

    #[test]
    fn checksum_lookup_matches_exact_name() {
        let hash_a = "a".repeat(64);
        let hash_b = "B".repeat(64);
        let sums = format!("{hash_a}  yt-dlp_linux_aarch64\n{hash_b}  yt-dlp_linux\n");
        assert_eq!(checksum_for(&sums, "yt-dlp_linux"), Some("b".repeat(64)));
        assert_eq!(checksum_for(&sums, "yt-dlp_linux_aarch64"), Some(hash_a));
        assert_eq!(checksum_for(&sums, "yt-dlp.exe"), None);
    }

    #[test]
    fn malformed_checksum_line_is_skipped() {
        assert_eq!(checksum_for("nothex  yt-dlp\n", "yt-dlp"), None);
    }
}
