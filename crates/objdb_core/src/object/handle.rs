//! Shared handles to live objects.

use std::any::{Any, TypeId};
use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::rc::{Rc, Weak};

/// A live, shared instance of a persisted type.
///
/// Clones point at the same instance. Reference identity, not field
/// equality, is what the transaction cache uses to tell instances apart.
pub struct Obj<T: 'static>(Rc<RefCell<T>>);

impl<T: 'static> Obj<T> {
    /// Wraps a value in a new instance.
    pub fn new(value: T) -> Self {
        Self(Rc::new(RefCell::new(value)))
    }

    /// Immutably borrows the instance.
    ///
    /// # Panics
    ///
    /// Panics if the instance is currently mutably borrowed.
    pub fn borrow(&self) -> Ref<'_, T> {
        self.0.borrow()
    }

    /// Mutably borrows the instance.
    ///
    /// # Panics
    ///
    /// Panics if the instance is currently borrowed.
    pub fn borrow_mut(&self) -> RefMut<'_, T> {
        self.0.borrow_mut()
    }

    /// Returns true if both handles point at the same instance.
    #[must_use]
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Rc::ptr_eq(&a.0, &b.0)
    }

    /// Erases the static type.
    #[must_use]
    pub fn to_any(&self) -> AnyObject {
        let rc: Rc<dyn Any> = self.0.clone();
        AnyObject(rc)
    }

    /// Recovers a typed handle, or `None` if `any` holds another type.
    #[must_use]
    pub fn from_any(any: &AnyObject) -> Option<Self> {
        Rc::clone(&any.0).downcast::<RefCell<T>>().ok().map(Self)
    }
}

impl<T: 'static> Clone for Obj<T> {
    fn clone(&self) -> Self {
        Self(Rc::clone(&self.0))
    }
}

impl<T: fmt::Debug + 'static> fmt::Debug for Obj<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.try_borrow() {
            Ok(value) => f.debug_tuple("Obj").field(&*value).finish(),
            Err(_) => f.write_str("Obj(<borrowed>)"),
        }
    }
}

/// Type-erased handle to a live instance.
#[derive(Clone)]
pub struct AnyObject(Rc<dyn Any>);

impl AnyObject {
    /// Wraps an arbitrary value, typed or not.
    ///
    /// Storing an instance whose type has no binding fails with
    /// [`crate::CoreError::UnsupportedType`].
    pub fn new<T: 'static>(value: T) -> Self {
        Obj::new(value).to_any()
    }

    /// Address of the instance, stable for as long as any handle lives.
    #[must_use]
    pub fn identity(&self) -> usize {
        Rc::as_ptr(&self.0).cast::<()>() as usize
    }

    /// Returns true if both handles point at the same instance.
    #[must_use]
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        a.identity() == b.identity()
    }

    /// Type id of the wrapped `RefCell<T>`.
    #[must_use]
    pub fn cell_type_id(&self) -> TypeId {
        Any::type_id(&*self.0)
    }

    /// Borrows the wrapped cell if it holds a `T`.
    #[must_use]
    pub fn downcast_ref<T: 'static>(&self) -> Option<&RefCell<T>> {
        self.0.downcast_ref::<RefCell<T>>()
    }

    /// Creates a non-owning handle.
    #[must_use]
    pub fn downgrade(&self) -> WeakObject {
        WeakObject(Rc::downgrade(&self.0))
    }
}

impl fmt::Debug for AnyObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AnyObject({:#x})", self.identity())
    }
}

/// Non-owning handle kept by the large object cache.
#[derive(Clone)]
pub struct WeakObject(Weak<dyn Any>);

impl WeakObject {
    /// Returns the instance if the application still holds it.
    #[must_use]
    pub fn upgrade(&self) -> Option<AnyObject> {
        self.0.upgrade().map(AnyObject)
    }

    /// Returns true once every strong handle is gone.
    #[must_use]
    pub fn is_dead(&self) -> bool {
        self.0.strong_count() == 0
    }
}

impl fmt::Debug for WeakObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WeakObject(alive: {})", !self.is_dead())
    }
}

/// `TypeId` under which handles of `T` are registered.
#[must_use]
pub fn cell_type_id_of<T: 'static>() -> TypeId {
    TypeId::of::<RefCell<T>>()
}
