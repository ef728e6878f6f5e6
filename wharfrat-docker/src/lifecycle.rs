//! `EnsureRunning`/`EnsureStopped`/`EnsureRemoved`: the container state
//! machine. Dispatches explicitly on every state the engine can report;
//! states this tool doesn't know how to recover from fail loudly rather
//! than being silently retried.

use anyhow::{Context as _, Result};
use bollard::{
    container::{RemoveContainerOptions, StopContainerOptions},
    errors::Error as BollardError,
    Docker,
};
use wharfrat_config::{Labels, WrError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Created,
    Running,
    Paused,
    Restarting,
    Removing,
    Exited,
    Dead,
}

impl State {
    #[must_use]
    pub fn parse(raw: &str) -> Option<State> {
        match raw {
            "created" => Some(State::Created),
            "running" => Some(State::Running),
            "paused" => Some(State::Paused),
            "restarting" => Some(State::Restarting),
            "removing" => Some(State::Removing),
            "exited" => Some(State::Exited),
            "dead" => Some(State::Dead),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            State::Created => "created",
            State::Running => "running",
            State::Paused => "paused",
            State::Restarting => "restarting",
            State::Removing => "removing",
            State::Exited => "exited",
            State::Dead => "dead",
        }
    }
}

/// What `EnsureRunning` found before deciding what to do: the container's
/// id, state, its labels (the freshness check compares these against the
/// caller's current crate fingerprint/tool commit), and the image id it was
/// actually created from (compared against the crate's freshly resolved
/// image id — a container can carry up-to-date labels yet still be running
/// an image that's since moved, e.g. a mutable `:latest` tag repulled).
pub struct Inspection {
    pub container_id: String,
    pub state: State,
    pub labels: Labels,
    pub image_id: String,
}

/// Looks up `name`, returning `None` if the engine has no such container
/// (as opposed to any other inspect failure, which propagates).
pub async fn inspect(docker: &Docker, name: &str) -> Result<Option<Inspection>> {
    match docker.inspect_container(name, None).await {
        Ok(details) => {
            let container_id = details.id.clone().unwrap_or_default();
            let raw_state =
                details.state.as_ref().and_then(|s| s.status).map(|s| s.to_string()).unwrap_or_default();
            let state = State::parse(&raw_state)
                .ok_or_else(|| WrError::UnsupportedState(name.to_owned(), raw_state.clone()))?;
            let label_map = details.config.as_ref().and_then(|c| c.labels.as_ref());
            let label = |key: &str| label_map.and_then(|l| l.get(key)).cloned().unwrap_or_default();
            let labels = Labels {
                project: label("rat.wharf.project"),
                krate: label("rat.wharf.crate"),
                commit: label("rat.wharf.commit"),
                config: label("rat.wharf.config"),
                branch: label("rat.wharf.branch"),
                user: label("rat.wharf.user"),
            };
            let image_id = details.image.clone().unwrap_or_default();
            Ok(Some(Inspection { container_id, state, labels, image_id }))
        }
        Err(BollardError::DockerResponseServerError { status_code: 404, .. }) => Ok(None),
        Err(e) => Err(e).context("inspecting container"),
    }
}

/// Decides what `ensure_running` should do next, given a fresh inspection
/// and whether its labels still match the caller's current crate
/// fingerprint/tool commit. Kept separate from the I/O so the decision
/// table is unit-testable without an engine.
#[must_use]
pub fn decide(found: Option<(State, bool)>, force: bool) -> Decision {
    let Some((state, is_fresh)) = found else { return Decision::Create };
    if !is_fresh && !force {
        return Decision::Stale;
    }
    match state {
        State::Running => Decision::ReturnExisting,
        State::Paused => Decision::Unpause,
        State::Exited => Decision::Start,
        other => Decision::Unsupported(other),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Create,
    ReturnExisting,
    Unpause,
    Start,
    Stale,
    Unsupported(State),
}

pub async fn ensure_stopped(docker: &Docker, name: &str) -> Result<()> {
    let Some(found) = inspect(docker, name).await? else { return Ok(()) };
    match found.state {
        State::Running | State::Paused | State::Restarting => {
            docker
                .stop_container(name, Some(StopContainerOptions { t: 10 }))
                .await
                .context("stopping container")?;
        }
        State::Created | State::Exited | State::Removing | State::Dead => {}
    }
    Ok(())
}

pub async fn ensure_removed(docker: &Docker, name: &str) -> Result<()> {
    if inspect(docker, name).await?.is_none() {
        return Ok(());
    }
    docker
        .remove_container(name, Some(RemoveContainerOptions { force: true, ..Default::default() }))
        .await
        .context("removing container")?;
    Ok(())
}

/// Drives the full `EnsureRunning` flow. `create` is invoked only when no
/// container with this identity exists, or when it existed but was stale
/// and `auto_clean` allowed removing it; it must return the new container's
/// id.
pub async fn ensure_running<F, Fut>(
    docker: &Docker,
    name: &str,
    current_fingerprint: &str,
    current_commit: &str,
    current_image_id: Option<&str>,
    force: bool,
    auto_clean: bool,
    create: F,
) -> Result<String>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<String>>,
{
    let found = inspect(docker, name).await?;
    let decision_input = found.as_ref().map(|i| {
        let image_id_matches = current_image_id.map_or(true, |id| id == i.image_id);
        let fresh = i.labels.is_fresh(current_fingerprint, current_commit, image_id_matches);
        (i.state, fresh)
    });

    let is_stale = matches!(decision_input, Some((_, false)));
    if is_stale && !force && auto_clean {
        ensure_removed(docker, name).await?;
        return create().await;
    }

    match decide(decision_input, force) {
        Decision::Create => create().await,
        Decision::Stale => Err(WrError::StaleContainer(name.to_owned()).into()),
        Decision::Unsupported(state) => {
            Err(WrError::UnsupportedState(name.to_owned(), state.as_str().to_owned()).into())
        }
        Decision::ReturnExisting => Ok(found.expect("found when not Create").container_id),
        Decision::Unpause => {
            docker.unpause_container(name).await.context("unpausing container")?;
            Ok(found.expect("found when not Create").container_id)
        }
        Decision::Start => {
            docker
                .start_container(name, None::<bollard::container::StartContainerOptions<String>>)
                .await
                .context("starting container")?;
            Ok(found.expect("found when not Create").container_id)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_running_container_is_returned_as_is() {
        assert_eq!(decide(Some((State::Running, true)), false), Decision::ReturnExisting);
    }

    #[test]
    fn fresh_paused_container_is_unpaused() {
        assert_eq!(decide(Some((State::Paused, true)), false), Decision::Unpause);
    }

    #[test]
    fn fresh_exited_container_is_started() {
        assert_eq!(decide(Some((State::Exited, true)), false), Decision::Start);
    }

    #[test]
    fn fresh_created_container_is_unsupported() {
        assert_eq!(decide(Some((State::Created, true)), false), Decision::Unsupported(State::Created));
    }

    #[test]
    fn stale_container_without_force_is_rejected() {
        assert_eq!(decide(Some((State::Running, false)), false), Decision::Stale);
    }

    #[test]
    fn stale_container_with_force_proceeds_by_state() {
        assert_eq!(decide(Some((State::Running, false)), true), Decision::ReturnExisting);
    }

    #[test]
    fn absent_container_is_created() {
        assert_eq!(decide(None, false), Decision::Create);
    }

    #[test]
    fn state_round_trips_through_parse_and_as_str() {
        for s in [
            State::Created,
            State::Running,
            State::Paused,
            State::Restarting,
            State::Removing,
            State::Exited,
            State::Dead,
        ] {
            assert_eq!(State::parse(s.as_str()), Some(s));
        }
    }
}
