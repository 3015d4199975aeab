//! Fixture management.
//!
//! Fixtures are set up in priority order (highest first) and torn down in
//! reverse. A failed setup tears down whatever was already set up before the
//! error is returned. Service doubles are fixtures: a scenario registers them
//! and the scenario runner owns their lifetime.
//!
//! ```ignore
//! let mut fixtures = FixtureManager::new();
//! fixtures.register(SsoDouble::new("secret"));
//! fixtures.setup_all().await?;
//! let sso = fixtures.get::<SsoDouble>().expect("registered");
//! ```

use crate::result::{HarnessError, HarnessResult};
use async_trait::async_trait;
use std::any::{Any, TypeId};
use std::collections::HashMap;

/// Something a scenario needs running before it starts.
#[async_trait]
pub trait Fixture: Any + Send + Sync {
    /// Acquire the resource
    async fn setup(&mut self) -> HarnessResult<()>;

    /// Release the resource
    async fn teardown(&mut self) -> HarnessResult<()>;

    /// Fixture name for logs and errors
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Higher priorities are set up first and torn down last
    fn priority(&self) -> i32 {
        0
    }
}

/// Lifecycle state of a registered fixture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixtureState {
    /// Registered, not set up
    Registered,
    /// Set up successfully
    SetUp,
    /// Torn down
    TornDown,
    /// Setup or teardown failed
    Failed,
}

trait ErasedFixture: Fixture {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Fixture> ErasedFixture for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

struct FixtureEntry {
    fixture: Box<dyn ErasedFixture>,
    state: FixtureState,
    priority: i32,
    registered: usize,
}

/// Ordered set of fixtures, one per type
#[derive(Default)]
pub struct FixtureManager {
    fixtures: HashMap<TypeId, FixtureEntry>,
    setup_order: Vec<TypeId>,
    next: usize,
}

impl std::fmt::Debug for FixtureManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FixtureManager")
            .field("fixture_count", &self.fixtures.len())
            .field("set_up", &self.setup_order.len())
            .finish()
    }
}

impl FixtureManager {
    /// Create an empty manager
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fixture, replacing any fixture of the same type
    pub fn register<F: Fixture>(&mut self, fixture: F) {
        let priority = fixture.priority();
        self.next += 1;
        self.fixtures.insert(
            TypeId::of::<F>(),
            FixtureEntry {
                fixture: Box::new(fixture),
                state: FixtureState::Registered,
                priority,
                registered: self.next,
            },
        );
    }

    /// Whether a fixture of type `F` is registered
    #[must_use]
    pub fn is_registered<F: Fixture>(&self) -> bool {
        self.fixtures.contains_key(&TypeId::of::<F>())
    }

    /// Number of registered fixtures
    #[must_use]
    pub fn count(&self) -> usize {
        self.fixtures.len()
    }

    /// State of the fixture of type `F`
    #[must_use]
    pub fn state<F: Fixture>(&self) -> Option<FixtureState> {
        self.fixtures.get(&TypeId::of::<F>()).map(|e| e.state)
    }

    /// Borrow the fixture of type `F`
    #[must_use]
    pub fn get<F: Fixture>(&self) -> Option<&F> {
        self.fixtures
            .get(&TypeId::of::<F>())
            .and_then(|e| e.fixture.as_any().downcast_ref::<F>())
    }

    /// Mutably borrow the fixture of type `F`
    #[must_use]
    pub fn get_mut<F: Fixture>(&mut self) -> Option<&mut F> {
        self.fixtures
            .get_mut(&TypeId::of::<F>())
            .and_then(|e| e.fixture.as_any_mut().downcast_mut::<F>())
    }

    /// Names of registered fixtures in setup order
    #[must_use]
    pub fn list(&self) -> Vec<&str> {
        self.ordered()
            .iter()
            .filter_map(|id| self.fixtures.get(id).map(|e| e.fixture.name()))
            .collect()
    }

    /// Priority first, then registration order
    fn ordered(&self) -> Vec<TypeId> {
        let mut ordered: Vec<(TypeId, i32, usize)> = self
            .fixtures
            .iter()
            .map(|(id, e)| (*id, e.priority, e.registered))
            .collect();
        ordered.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));
        ordered.into_iter().map(|(id, _, _)| id).collect()
    }

    /// Set up every fixture that is not already set up.
    ///
    /// On failure, fixtures set up so far are torn down before returning.
    pub async fn setup_all(&mut self) -> HarnessResult<()> {
        for type_id in self.ordered() {
            let Some(entry) = self.fixtures.get_mut(&type_id) else {
                continue;
            };
            if entry.state == FixtureState::SetUp {
                continue;
            }
            tracing::debug!(fixture = entry.fixture.name(), "setting up fixture");
            match entry.fixture.setup().await {
                Ok(()) => {
                    entry.state = FixtureState::SetUp;
                    self.setup_order.push(type_id);
                }
                Err(e) => {
                    entry.state = FixtureState::Failed;
                    let fixture = entry.fixture.name().to_string();
                    if let Err(rollback) = self.teardown_all().await {
                        tracing::warn!(error = %rollback, "rollback after failed setup was incomplete");
                    }
                    return Err(HarnessError::Fixture {
                        fixture,
                        message: format!("setup failed: {e}"),
                    });
                }
            }
        }
        Ok(())
    }

    /// Tear down in reverse setup order.
    ///
    /// Every fixture is attempted; failures are collected into `ContextTeardown`.
    pub async fn teardown_all(&mut self) -> HarnessResult<()> {
        let mut failures = Vec::new();
        for type_id in std::mem::take(&mut self.setup_order).into_iter().rev() {
            let Some(entry) = self.fixtures.get_mut(&type_id) else {
                continue;
            };
            if entry.state != FixtureState::SetUp {
                continue;
            }
            tracing::debug!(fixture = entry.fixture.name(), "tearing down fixture");
            match entry.fixture.teardown().await {
                Ok(()) => entry.state = FixtureState::TornDown,
                Err(e) => {
                    entry.state = FixtureState::Failed;
                    failures.push(format!("fixture '{}' teardown failed: {e}", entry.fixture.name()));
                }
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(HarnessError::ContextTeardown { failures })
        }
    }

    /// Unregister the fixture of type `F` without tearing it down
    pub fn unregister<F: Fixture>(&mut self) -> bool {
        let type_id = TypeId::of::<F>();
        self.setup_order.retain(|id| *id != type_id);
        self.fixtures.remove(&type_id).is_some()
    }
}

type Hook = Box<dyn FnMut() -> HarnessResult<()> + Send + Sync>;

/// A fixture made of two closures
pub struct SimpleFixture {
    name: String,
    priority: i32,
    setup_fn: Option<Hook>,
    teardown_fn: Option<Hook>,
}

impl std::fmt::Debug for SimpleFixture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimpleFixture")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}

impl SimpleFixture {
    /// Fixture named `name` that does nothing until hooks are added
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            priority: 0,
            setup_fn: None,
            teardown_fn: None,
        }
    }

    /// Run `f` on setup
    #[must_use]
    pub fn with_setup<F>(mut self, f: F) -> Self
    where
        F: FnMut() -> HarnessResult<()> + Send + Sync + 'static,
    {
        self.setup_fn = Some(Box::new(f));
        self
    }

    /// Run `f` on teardown
    #[must_use]
    pub fn with_teardown<F>(mut self, f: F) -> Self
    where
        F: FnMut() -> HarnessResult<()> + Send + Sync + 'static,
    {
        self.teardown_fn = Some(Box::new(f));
        self
    }

    /// Set the priority
    #[must_use]
    pub const fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

#[async_trait]
impl Fixture for SimpleFixture {
    async fn setup(&mut self) -> HarnessResult<()> {
        match &mut self.setup_fn {
            Some(f) => f(),
            None => Ok(()),
        }
    }

    async fn teardown(&mut self) -> HarnessResult<()> {
        match &mut self.teardown_fn {
            Some(f) => f(),
            None => Ok(()),
        }
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> i32 {
        self.priority
    }
}
