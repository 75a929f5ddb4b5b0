// Copyright 2025 The kmesh Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
//

//! Boxed error type shared by the privacy filter crates.
//!
//! Component crates define precise `thiserror` enums and convert into [`Error`] at
//! their boundaries, adding human readable context on the way up.

use std::{borrow::Cow, error::Error as ErrorTrait, fmt};

pub type BoxedErr = Box<dyn ErrorTrait + Send + Sync + 'static>;
pub type Result<T> = std::result::Result<T, Error>;

pub struct Error {
    source: BoxedErr,
    // innermost context first
    context: Vec<Cow<'static, str>>,
}

impl<E> From<E> for Error
where
    E: Into<BoxedErr>,
{
    fn from(err: E) -> Self {
        Self { source: err.into(), context: Vec::new() }
    }
}

impl Error {
    #[must_use]
    pub fn context<M: Into<Cow<'static, str>>>(mut self, msg: M) -> Self {
        self.context.push(msg.into());
        self
    }

    pub fn inner(&self) -> &(dyn ErrorTrait + Send + Sync + 'static) {
        self.source.as_ref()
    }

    pub fn into_inner(self) -> BoxedErr {
        self.source
    }

    pub fn downcast_ref<E: ErrorTrait + 'static>(&self) -> Option<&E> {
        self.source.downcast_ref::<E>()
    }

    pub fn is<E: ErrorTrait + 'static>(&self) -> bool {
        self.source.is::<E>()
    }

    /// Iterates over the attached context messages, outermost first.
    pub fn contexts(&self) -> impl Iterator<Item = &str> {
        self.context.iter().rev().map(AsRef::as_ref)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for msg in self.contexts() {
            write!(f, "{msg}: ")?;
        }
        write!(f, "{}", self.source)?;
        let mut cause = self.source.source();
        while let Some(err) = cause {
            write!(f, ": {err}")?;
            cause = err.source();
        }
        Ok(())
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Error").field("context", &self.context).field("source", &self.source).finish()
    }
}

pub trait Context<T> {
    fn with_context_msg<M: Into<Cow<'static, str>>>(self, msg: M) -> Result<T>;

    fn with_context<M, F>(self, f: F) -> Result<T>
    where
        M: Into<Cow<'static, str>>,
        F: FnOnce() -> M;
}

impl<T, E: Into<Error>> Context<T> for std::result::Result<T, E> {
    fn with_context_msg<M: Into<Cow<'static, str>>>(self, msg: M) -> Result<T> {
        self.map_err(|e| e.into().context(msg))
    }

    fn with_context<M, F>(self, f: F) -> Result<T>
    where
        M: Into<Cow<'static, str>>,
        F: FnOnce() -> M,
    {
        self.map_err(|e| e.into().context(f()))
    }
}

impl<T> Context<T> for Option<T> {
    fn with_context_msg<M: Into<Cow<'static, str>>>(self, msg: M) -> Result<T> {
        let msg = msg.into();
        self.ok_or_else(|| Error::from(msg.into_owned()))
    }

    fn with_context<M, F>(self, f: F) -> Result<T>
    where
        M: Into<Cow<'static, str>>,
        F: FnOnce() -> M,
    {
        self.ok_or_else(|| Error::from(f().into().into_owned()))
    }
}
