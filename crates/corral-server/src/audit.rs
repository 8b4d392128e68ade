use corral_core::entity::Status;

pub fn audit_token_issued(subject_id: &str, refreshed: bool) {
    tracing::info!(
        target: "audit",
        event = "token_issued",
        subject_id = subject_id,
        refreshed = refreshed,
        "token pair issued"
    );
}

pub fn audit_policy_added(caller: &str, subject: &str, object: &str, actions: &[String]) {
    tracing::info!(
        target: "audit",
        event = "policy_added",
        caller = caller,
        subject = subject,
        object = object,
        actions = actions.join(","),
        "policy added"
    );
}

pub fn audit_policy_updated(caller: &str, subject: &str, object: &str, actions: &[String]) {
    tracing::info!(
        target: "audit",
        event = "policy_updated",
        caller = caller,
        subject = subject,
        object = object,
        actions = actions.join(","),
        "policy updated"
    );
}

pub fn audit_policy_deleted(caller: &str, subject: &str, object: &str) {
    tracing::info!(
        target: "audit",
        event = "policy_deleted",
        caller = caller,
        subject = subject,
        object = object,
        "policy deleted"
    );
}

pub fn audit_group_created(owner: &str, group_id: &str, parent_id: Option<&str>) {
    tracing::info!(
        target: "audit",
        event = "group_created",
        owner = owner,
        group_id = group_id,
        parent_id = parent_id.unwrap_or(""),
        "group created"
    );
}

pub fn audit_client_registered(owner: &str, client_id: &str) {
    tracing::info!(
        target: "audit",
        event = "client_registered",
        owner = owner,
        client_id = client_id,
        "client registered"
    );
}

pub fn audit_status_changed(caller: &str, entity: &str, id: &str, status: Status) {
    tracing::info!(
        target: "audit",
        event = "status_changed",
        caller = caller,
        entity = entity,
        id = id,
        status = status.as_str(),
        "status changed"
    );
}

/// `reason` must describe the failure without echoing the presented token.
pub fn audit_auth_failure(reason: &str) {
    tracing::warn!(
        target: "audit",
        event = "auth_failure",
        reason = reason,
        "authentication failed"
    );
}
