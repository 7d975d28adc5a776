//! Free-text search that narrows ranking to matching query classes.

use std::collections::BTreeSet;

use crate::{
    InstanceId, MetricStore, ProfileError, ProfileResult, QueryClassId, RequestScope, TimeWindow,
};

/// Classes active in `window` whose checksum equals `search`, whose abstract
/// starts with it, or whose fingerprint contains it.
///
/// An empty result is returned as-is; the caller decides that it is terminal.
pub fn resolve_search(
    store: &dyn MetricStore,
    scope: &RequestScope,
    instance_id: InstanceId,
    window: &TimeWindow,
    search: &str,
) -> ProfileResult<BTreeSet<QueryClassId>> {
    scope.check("filter.search")?;
    let ids = store
        .search_class_ids(instance_id, window, search)
        .map_err(ProfileError::store("filter.search"))?;
    tracing::debug!(instance_id, search, matched = ids.len(), "resolved search filter");
    Ok(ids)
}
