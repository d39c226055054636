//! Test identities
//!
//! A [`TestIdentity`] names the executing test and keys its working
//! directory. Rust paths (`suite::module::test_name`) are stored in dotted
//! form (`suite.module.test_name`) so they stay valid directory names on every
//! platform.

use std::fmt;

use crate::error::{HarnessError, HarnessResult};

/// Unique, filesystem-safe name of one test execution.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TestIdentity(String);

impl TestIdentity {
    /// Build an identity from a fully-qualified test name.
    pub fn new(name: impl AsRef<str>) -> HarnessResult<Self> {
        let dotted = name.as_ref().trim().replace("::", ".");
        if dotted.is_empty()
            || dotted == "."
            || dotted == ".."
            || dotted.contains('/')
            || dotted.contains('\\')
            || dotted.contains('\0')
        {
            return Err(HarnessError::InvalidIdentity(name.as_ref().to_string()));
        }
        Ok(Self(dotted))
    }

    /// Build an identity from a module path and a test function name.
    pub fn from_parts(module_path: &str, test_name: &str) -> HarnessResult<Self> {
        Self::new(format!("{}::{}", module_path, test_name))
    }

    /// Identity of the currently running libtest test.
    ///
    /// libtest names each test thread after the test's path. Returns `None`
    /// on the main thread or on unnamed threads.
    pub fn current() -> Option<Self> {
        let thread = std::thread::current();
        let name = thread.name()?;
        if name == "main" {
            return None;
        }
        Self::new(name).ok()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TestIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for TestIdentity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Identity of the enclosing test function.
///
/// `test_identity!()` resolves the enclosing function's path at compile time;
/// `test_identity!("name")` pairs the current module path with `name`.
/// Both evaluate to `HarnessResult<TestIdentity>`.
#[macro_export]
macro_rules! test_identity {
    () => {{
        fn __here() {}
        fn __type_name_of<T>(_: T) -> &'static str {
            ::std::any::type_name::<T>()
        }
        let path = __type_name_of(__here);
        let path = path.strip_suffix("::__here").unwrap_or(path);
        $crate::identity::TestIdentity::new(path)
    }};
    ($name:expr) => {
        $crate::identity::TestIdentity::from_parts(module_path!(), $name)
    };
}
