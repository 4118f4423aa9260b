use std::{collections::HashSet, fmt};

use shared::domain::{LocationId, LocationLink, LocationLinkPatch, PatchKind};

use crate::error::NavigationError;

/// Reserved location id substituted by the selected clinic. The angle brackets
/// keep it out of the backend's id space.
pub const CLINIC_PLACEHOLDER: &str = "<xxx_clinic>";
pub const EMPTY_ROUTE_TEXT: &str = "No route available";

/// entrance → registration_center → clinic → pharmacy → exit
pub fn base_route_template() -> Vec<LocationLink> {
    vec![
        LocationLink::new("entrance", "registration_center"),
        LocationLink::new("registration_center", CLINIC_PLACEHOLDER),
        LocationLink::new(CLINIC_PLACEHOLDER, "pharmacy"),
        LocationLink::new("pharmacy", "exit"),
    ]
}

pub fn generate_original_route(
    clinic_id: &str,
    template: &[LocationLink],
) -> Result<Vec<LocationLink>, NavigationError> {
    if clinic_id.trim().is_empty() {
        return Err(NavigationError::invalid_argument(
            "clinic id is required to generate the original route",
        ));
    }

    let substitute = |id: &LocationId| {
        if id.as_str() == CLINIC_PLACEHOLDER {
            LocationId::from(clinic_id)
        } else {
            id.clone()
        }
    };

    Ok(template
        .iter()
        .map(|link| LocationLink {
            this: substitute(&link.this),
            next: substitute(&link.next),
        })
        .collect())
}

/// A patch that could not be applied as written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchAnomaly {
    /// No link matched `{this, next}`; the patch was dropped.
    UnmatchedDelete { link: LocationLink },
    /// No link starts at `previous`; the new link was appended at the end.
    UnanchoredInsert {
        previous: LocationId,
        link: LocationLink,
    },
}

impl fmt::Display for PatchAnomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnmatchedDelete { link } => {
                write!(f, "未找到需要删除的路段 {link}，已忽略")
            }
            Self::UnanchoredInsert { previous, link } => {
                write!(f, "未找到 {previous} 出发的路段，{link} 已追加到路线末尾")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchOutcome {
    pub route: Vec<LocationLink>,
    pub anomalies: Vec<PatchAnomaly>,
}

impl PatchOutcome {
    pub fn is_clean(&self) -> bool {
        self.anomalies.is_empty()
    }
}

/// Applies every delete (in input order) against the pristine adjacency, then
/// every insert (in input order). The input route is left untouched.
pub fn apply_patches(route: &[LocationLink], patches: &[LocationLinkPatch]) -> PatchOutcome {
    let mut current = route.to_vec();
    let mut anomalies = Vec::new();

    for patch in patches.iter().filter(|p| p.kind == PatchKind::Delete) {
        match current
            .iter()
            .position(|link| link.this == patch.this && link.next == patch.next)
        {
            Some(index) => current = without_link(&current, index),
            None => anomalies.push(PatchAnomaly::UnmatchedDelete { link: patch.link() }),
        }
    }

    for patch in patches.iter().filter(|p| p.kind == PatchKind::Insert) {
        match current.iter().position(|link| link.this == patch.previous) {
            Some(anchor) => current = with_link_after(&current, anchor, patch.link()),
            None => {
                anomalies.push(PatchAnomaly::UnanchoredInsert {
                    previous: patch.previous.clone(),
                    link: patch.link(),
                });
                current = current.into_iter().chain([patch.link()]).collect();
            }
        }
    }

    PatchOutcome {
        route: current,
        anomalies,
    }
}

fn without_link(route: &[LocationLink], index: usize) -> Vec<LocationLink> {
    // The predecessor keeps its old `next` when the removed link was the tail.
    let successor = route.get(index + 1).map(|link| link.this.clone());
    route
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != index)
        .map(|(i, link)| match &successor {
            Some(next) if i + 1 == index => link.rewired(next.clone()),
            _ => link.clone(),
        })
        .collect()
}

fn with_link_after(route: &[LocationLink], anchor: usize, inserted: LocationLink) -> Vec<LocationLink> {
    let mut rebuilt = Vec::with_capacity(route.len() + 1);
    for (i, link) in route.iter().enumerate() {
        if i == anchor {
            rebuilt.push(link.rewired(inserted.this.clone()));
            rebuilt.push(inserted.clone());
        } else {
            rebuilt.push(link.clone());
        }
    }
    rebuilt
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteValidation {
    pub valid: bool,
    pub errors: Vec<String>,
}

/// Advisory check: non-empty, every hop continues where the previous one
/// ended, and no location is departed from twice.
pub fn validate_route_continuity(route: &[LocationLink]) -> RouteValidation {
    if route.is_empty() {
        return RouteValidation {
            valid: false,
            errors: vec!["Route is empty".to_string()],
        };
    }

    let mut errors: Vec<String> = route
        .windows(2)
        .enumerate()
        .filter(|(_, pair)| pair[0].next != pair[1].this)
        .map(|(index, pair)| {
            format!(
                "Link discontinuity at index {index}: {} does not connect to {}",
                pair[0], pair[1]
            )
        })
        .collect();

    let mut seen = HashSet::new();
    let mut duplicates: Vec<&LocationId> = Vec::new();
    for link in route {
        if !seen.insert(&link.this) && !duplicates.contains(&&link.this) {
            duplicates.push(&link.this);
        }
    }
    if !duplicates.is_empty() {
        let listed = duplicates
            .iter()
            .map(|id| id.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        errors.push(format!("Duplicate location IDs found: {listed}"));
    }

    RouteValidation {
        valid: errors.is_empty(),
        errors,
    }
}

pub fn format_route_for_display(route: &[LocationLink]) -> String {
    let Some(first) = route.first() else {
        return EMPTY_ROUTE_TEXT.to_string();
    };

    let last = route.len() - 1;
    std::iter::once(format!("从 {} 出发", first.this))
        .chain(route.iter().enumerate().map(|(i, link)| {
            if i < last {
                format!("→ 前往 {}", link.next)
            } else {
                format!("→ 到达终点 {}", link.next)
            }
        }))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn format_patches_for_display(patches: &[LocationLinkPatch]) -> String {
    if patches.is_empty() {
        return "无路线修改".to_string();
    }

    let lines = patches
        .iter()
        .map(|patch| match patch.kind {
            PatchKind::Insert => format!(
                "在 {} 之后插入 {} → {}",
                patch.previous, patch.this, patch.next
            ),
            PatchKind::Delete => format!("删除 {} → {}", patch.this, patch.next),
        })
        .collect::<Vec<_>>();
    format!("路线修改:\n{}", lines.join("\n"))
}

/// Visited locations in walking order, each listed once.
pub fn extract_location_ids(route: &[LocationLink]) -> Vec<LocationId> {
    let Some(first) = route.first() else {
        return Vec::new();
    };

    let mut ids = vec![first.this.clone()];
    for link in route {
        if !ids.contains(&link.next) {
            ids.push(link.next.clone());
        }
    }
    ids
}

pub fn route_contains_location(route: &[LocationLink], location: &str) -> bool {
    !location.is_empty()
        && route
            .iter()
            .any(|link| link.this == location || link.next == location)
}

pub fn next_location<'a>(route: &'a [LocationLink], current: &str) -> Option<&'a LocationId> {
    route
        .iter()
        .find(|link| link.this == current)
        .map(|link| &link.next)
}

#[cfg(test)]
#[path = "tests/route_tests.rs"]
mod tests;
