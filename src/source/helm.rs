use semver::{Version, VersionReq};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use url::Url;

use super::auth::{http_client, SourceCredentials};
use crate::error::{FleetError, FleetResult};

fn parse_repo_url(repo_url: &str) -> FleetResult<Url> {
    Url::parse(repo_url)
        .map_err(|e| FleetError::InvalidInput(format!("invalid helm repo URL {repo_url:?}: {e}")))
}

/// A helm repository's `index.yaml`, reduced to what version selection
/// needs.
#[derive(Clone, Debug, Deserialize)]
pub struct HelmIndex {
    #[serde(default)]
    pub entries: BTreeMap<String, Vec<HelmChartEntry>>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct HelmChartEntry {
    pub version: String,

    #[serde(default)]
    pub urls: Vec<String>,

    #[serde(default)]
    pub digest: Option<String>,
}

/// Fetch and parse a repository index.
pub async fn fetch_index(repo_url: &str, creds: &SourceCredentials) -> FleetResult<HelmIndex> {
    let client = http_client(creds)?;
    let base = parse_repo_url(&format!("{}/", repo_url.trim_end_matches('/')))?;
    let index_url = base
        .join("index.yaml")
        .map_err(|e| FleetError::InvalidInput(format!("invalid helm repo URL: {e}")))?;

    let mut request = client.get(index_url);
    if let (Some(user), Some(pass)) = (&creds.username, &creds.password) {
        request = request.basic_auth(user, Some(pass));
    }

    let response = request.send().await?;
    if response.status() == reqwest::StatusCode::UNAUTHORIZED
        || response.status() == reqwest::StatusCode::FORBIDDEN
    {
        return Err(FleetError::Auth(repo_url.to_string()));
    }
    let body = response.error_for_status()?.text().await?;

    Ok(serde_yaml::from_str(&body)?)
}

/// Select the highest chart version matching the constraint. Empty or `*`
/// matches everything; an exact version short-circuits; anything else is
/// parsed as a semver requirement.
pub fn select_version<'a>(
    index: &'a HelmIndex,
    chart: &str,
    constraint: &str,
) -> FleetResult<&'a HelmChartEntry> {
    let entries = index.entries.get(chart).ok_or_else(|| {
        FleetError::NoChartVersionFound {
            repo: chart.to_string(),
            constraint: constraint.to_string(),
        }
    })?;

    let constraint = constraint.trim();

    let mut candidates: Vec<(&HelmChartEntry, Version)> = entries
        .iter()
        .filter_map(|e| Version::parse(&e.version).ok().map(|v| (e, v)))
        .collect();
    candidates.sort_by(|a, b| b.1.cmp(&a.1));

    if constraint.is_empty() || constraint == "*" {
        return candidates
            .first()
            .map(|(e, _)| *e)
            .ok_or_else(|| FleetError::NoChartVersionFound {
                repo: chart.to_string(),
                constraint: constraint.to_string(),
            });
    }

    // An exact, parseable version is matched literally before semver range
    // semantics kick in.
    if let Ok(exact) = Version::parse(constraint) {
        if let Some((entry, _)) = candidates.iter().find(|(_, v)| *v == exact) {
            return Ok(*entry);
        }
        return Err(FleetError::NoChartVersionFound {
            repo: chart.to_string(),
            constraint: constraint.to_string(),
        });
    }

    let req = VersionReq::parse(constraint)?;
    candidates
        .iter()
        .find(|(_, v)| req.matches(v))
        .map(|(e, _)| *e)
        .ok_or_else(|| FleetError::NoChartVersionFound {
            repo: chart.to_string(),
            constraint: constraint.to_string(),
        })
}

/// Download a chart tarball.
pub async fn download_chart(
    repo_url: &str,
    entry: &HelmChartEntry,
    creds: &SourceCredentials,
) -> FleetResult<Vec<u8>> {
    let url = entry
        .urls
        .first()
        .ok_or_else(|| FleetError::InvalidInput("chart entry has no urls".to_string()))?;

    // Index URLs may be relative to the repository root.
    let absolute = if url.contains("://") {
        parse_repo_url(url)?
    } else {
        parse_repo_url(&format!("{}/", repo_url.trim_end_matches('/')))?
            .join(url)
            .map_err(|e| FleetError::InvalidInput(format!("invalid chart URL {url:?}: {e}")))?
    };

    let client = http_client(creds)?;
    let mut request = client.get(absolute);
    if let (Some(user), Some(pass)) = (&creds.username, &creds.password) {
        request = request.basic_auth(user, Some(pass));
    }

    let response = request.send().await?;
    if response.status() == reqwest::StatusCode::UNAUTHORIZED
        || response.status() == reqwest::StatusCode::FORBIDDEN
    {
        return Err(FleetError::Auth(repo_url.to_string()));
    }

    Ok(response.error_for_status()?.bytes().await?.to_vec())
}

/// Unpack a chart tarball into `dest`, stripping the leading chart-name
/// directory so `Chart.yaml` lands at the root.
pub fn unpack_chart(tgz: &[u8], dest: &Path) -> FleetResult<()> {
    let decoder = flate2::read::GzDecoder::new(tgz);
    let mut archive = tar::Archive::new(decoder);

    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.into_owned();

        let stripped: std::path::PathBuf = path.components().skip(1).collect();
        if stripped.as_os_str().is_empty() {
            continue;
        }

        let target = dest.join(&stripped);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        entry.unpack(&target)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    fn index() -> HelmIndex {
        serde_yaml::from_str(indoc! {"
            entries:
              nginx:
                - version: 1.2.3
                  urls: [charts/nginx-1.2.3.tgz]
                - version: 1.10.0
                  urls: [charts/nginx-1.10.0.tgz]
                - version: 2.0.0-rc.1
                  urls: [charts/nginx-2.0.0-rc.1.tgz]
              redis:
                - version: 0.9.0
                  urls: [charts/redis-0.9.0.tgz]
        "})
        .expect("parse index")
    }

    #[test]
    fn empty_and_star_select_the_highest() {
        let index = index();
        assert_eq!(select_version(&index, "nginx", "").expect("select").version, "2.0.0-rc.1");
        assert_eq!(select_version(&index, "nginx", "*").expect("select").version, "2.0.0-rc.1");
    }

    #[test]
    fn exact_version_matches_literally() {
        let index = index();
        assert_eq!(
            select_version(&index, "nginx", "1.2.3").expect("select").version,
            "1.2.3"
        );
        assert!(matches!(
            select_version(&index, "nginx", "9.9.9"),
            Err(FleetError::NoChartVersionFound { .. })
        ));
    }

    #[test]
    fn semver_ranges_select_the_highest_match() {
        let index = index();
        // Highest 1.x is 1.10.0, not the lexically-larger 1.2.3.
        assert_eq!(
            select_version(&index, "nginx", "^1.0").expect("select").version,
            "1.10.0"
        );
    }

    #[test]
    fn unknown_chart_is_no_chart_version_found() {
        let index = index();
        assert!(matches!(
            select_version(&index, "absent", "*"),
            Err(FleetError::NoChartVersionFound { .. })
        ));
    }

    #[test]
    fn invalid_constraint_is_fatal_for_the_revision() {
        let index = index();
        assert!(matches!(
            select_version(&index, "nginx", "not-a-range"),
            Err(FleetError::VersionConstraint(_))
        ));
    }
}
