//! The object registry capability.
//!
//! Generated host-side code resolves native identities to host proxies
//! through a registry that constructs at most one proxy per identity. The
//! generator only emits calls into it; the registry itself lives in the
//! support runtime. Implementations decide how those calls are spelled.

use crossbind_core::code::{Expr, RuntimeOp};
use crossbind_core::TypeSpec;

pub trait ObjectRegistry {
    /// The host proxy for a native object handle, created on first lookup.
    fn proxy_for_handle(&self, handle: Expr, class: &TypeSpec) -> Expr;

    /// The native handle of a host proxy.
    fn handle_for_proxy(&self, proxy: Expr) -> Expr;

    /// The host interface proxy for an existential container pointer.
    fn interface_for_existential(&self, container: Expr, protocol: &TypeSpec) -> Expr;

    /// Write an existential container for a host interface value to `dest`.
    fn existential_for_interface(&self, value: Expr, protocol: &TypeSpec, dest: Expr) -> Expr;
}

/// Emits the support runtime's registry operations.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuntimeRegistry;

impl ObjectRegistry for RuntimeRegistry {
    fn proxy_for_handle(&self, handle: Expr, class: &TypeSpec) -> Expr {
        Expr::runtime(RuntimeOp::ProxyForHandle(class.clone()), vec![handle])
    }

    fn handle_for_proxy(&self, proxy: Expr) -> Expr {
        Expr::runtime(RuntimeOp::ToHandle, vec![proxy])
    }

    fn interface_for_existential(&self, container: Expr, protocol: &TypeSpec) -> Expr {
        Expr::runtime(RuntimeOp::InterfaceForExistential(protocol.clone()), vec![container])
    }

    fn existential_for_interface(&self, value: Expr, protocol: &TypeSpec, dest: Expr) -> Expr {
        Expr::runtime(RuntimeOp::ExistentialForInterface(protocol.clone()), vec![value, dest])
    }
}
