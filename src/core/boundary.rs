//! # Boundary Safety Module / 边界安全模块
//!
//! This module decides statically whether a type is safe to carry by value
//! across the isolation boundary. It works over a [`TypeCatalog`] of
//! [`TypeMetadata`], which the crate's own boundary types populate through
//! the [`Described`] trait.
//!
//! 此模块静态地判断一个类型是否可以安全地按值跨越隔离边界传递。
//! 它基于 [`TypeMetadata`] 的 [`TypeCatalog`] 工作，
//! crate 自身的边界类型通过 [`Described`] trait 填充该目录。
//!
//! The check catches *typical* mistakes; it is not a soundness proof:
//!
//! 1. Registering a type as transferable does not guarantee it really serializes.
//! 2. Read-only lists are accepted whenever their element type is.
//! 3. Reflection metadata serializes fine but is rejected anyway, because it
//!    only makes sense against one side's loaded-module set.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::time::Duration;

use crate::core::error::BoundarySafetyViolation;
use crate::reflect::{
    AttributeMetadata, BindingFlags, MethodMetadata, ModuleMetadata, ParameterMetadata,
    PropertyMetadata, REFLECTION_NAMESPACE, TypeMetadata, TypeRef, builtin, is_in_namespace,
};

/// Root namespace of this crate's own types.
pub const OWN_NAMESPACE: &str = env!("CARGO_CRATE_NAME");

static BUILTINS: Lazy<HashMap<String, TypeMetadata>> = Lazy::new(|| {
    builtin::ALL
        .iter()
        .map(|name| {
            let meta = TypeMetadata::new(*name);
            let meta = if *name == builtin::OBJECT {
                meta
            } else {
                meta.transferable()
            };
            (name.to_string(), meta)
        })
        .collect()
});

/// A lookup table from full type name to its metadata.
/// New catalogs start out with the built-in primitive types.
///
/// 从完整类型名称到其元数据的查找表。
/// 新目录初始包含内置的原始类型。
#[derive(Debug, Clone)]
pub struct TypeCatalog {
    types: HashMap<String, TypeMetadata>,
}

impl Default for TypeCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeCatalog {
    pub fn new() -> Self {
        Self {
            types: BUILTINS.clone(),
        }
    }

    pub fn get(&self, full_name: &str) -> Option<&TypeMetadata> {
        self.types.get(full_name)
    }

    pub fn contains(&self, full_name: &str) -> bool {
        self.types.contains_key(full_name)
    }

    /// Inserts or replaces raw metadata.
    pub fn insert(&mut self, meta: TypeMetadata) {
        self.types.insert(meta.full_name.clone(), meta);
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Describes `T` (and everything it mentions) and returns its reference.
    pub fn register<T: Described + ?Sized>(&mut self) -> TypeRef {
        T::describe(self);
        T::type_ref()
    }

    /// Registers `T` with the transferability marker. Only serde-serializable
    /// types can carry the marker.
    pub fn transferable<T>(&mut self, build: impl FnOnce(TypeBuilder<'_>) -> TypeBuilder<'_>)
    where
        T: Described + Serialize + DeserializeOwned,
    {
        self.describe_with(T::type_ref(), true, build);
    }

    /// Registers `T` without the transferability marker.
    pub fn opaque<T>(&mut self, build: impl FnOnce(TypeBuilder<'_>) -> TypeBuilder<'_>)
    where
        T: Described + ?Sized,
    {
        self.describe_with(T::type_ref(), false, build);
    }

    fn describe_with(
        &mut self,
        ty: TypeRef,
        transferable: bool,
        build: impl FnOnce(TypeBuilder<'_>) -> TypeBuilder<'_>,
    ) {
        let TypeRef::Named(name) = ty else {
            return;
        };
        if self.contains(&name) {
            return;
        }

        let mut meta = TypeMetadata::new(name);
        meta.transferable = transferable;
        // The placeholder stops recursion through self-referencing types.
        self.insert(meta.clone());

        let TypeBuilder { meta, .. } = build(TypeBuilder {
            catalog: self,
            meta,
        });
        self.insert(meta);
    }
}

/// Collects the properties of a type being registered.
pub struct TypeBuilder<'c> {
    catalog: &'c mut TypeCatalog,
    meta: TypeMetadata,
}

impl TypeBuilder<'_> {
    /// A public instance property of type `P`.
    pub fn property<P: Described + ?Sized>(self, name: &str) -> Self {
        self.push::<P>(name, true, false)
    }

    pub fn non_public_property<P: Described + ?Sized>(self, name: &str) -> Self {
        self.push::<P>(name, false, false)
    }

    pub fn static_property<P: Described + ?Sized>(self, name: &str) -> Self {
        self.push::<P>(name, true, true)
    }

    fn push<P: Described + ?Sized>(mut self, name: &str, is_public: bool, is_static: bool) -> Self {
        let ty = self.catalog.register::<P>();
        self.meta.properties.push(PropertyMetadata {
            name: name.to_string(),
            ty,
            is_public,
            is_static,
        });
        self
    }
}

/// Types that can describe themselves to a [`TypeCatalog`].
/// 能够向 [`TypeCatalog`] 描述自身的类型。
pub trait Described {
    /// The reference used for this type in signatures and property lists.
    fn type_ref() -> TypeRef {
        TypeRef::of::<Self>()
    }

    /// Registers this type, and every type it mentions, into `catalog`.
    fn describe(catalog: &mut TypeCatalog);
}

macro_rules! builtin_described {
    ($($ty:ty => $name:expr),* $(,)?) => {
        $(
            impl Described for $ty {
                fn type_ref() -> TypeRef {
                    TypeRef::named($name)
                }

                fn describe(_: &mut TypeCatalog) {}
            }
        )*
    };
}

builtin_described! {
    () => builtin::VOID,
    bool => builtin::BOOL,
    char => builtin::CHAR,
    i32 => builtin::I32,
    i64 => builtin::I64,
    u8 => builtin::U8,
    u32 => builtin::U32,
    u64 => builtin::U64,
    usize => builtin::USIZE,
    f64 => builtin::F64,
    String => builtin::STRING,
    str => builtin::STRING,
    Duration => builtin::DURATION,
    DateTime<Utc> => builtin::TIMESTAMP,
    PathBuf => builtin::PATH,
    serde_json::Value => builtin::OBJECT,
}

impl<T: Described> Described for Vec<T> {
    fn type_ref() -> TypeRef {
        TypeRef::list(T::type_ref())
    }

    fn describe(catalog: &mut TypeCatalog) {
        T::describe(catalog);
    }
}

impl<T: Described> Described for Box<[T]> {
    fn type_ref() -> TypeRef {
        TypeRef::array(T::type_ref())
    }

    fn describe(catalog: &mut TypeCatalog) {
        T::describe(catalog);
    }
}

impl<T: Described> Described for Option<T> {
    fn type_ref() -> TypeRef {
        T::type_ref()
    }

    fn describe(catalog: &mut TypeCatalog) {
        T::describe(catalog);
    }
}

macro_rules! reflection_described {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Described for $ty {
                fn describe(catalog: &mut TypeCatalog) {
                    catalog.transferable::<Self>(|t| t);
                }
            }
        )*
    };
}

reflection_described!(
    TypeRef,
    TypeMetadata,
    MethodMetadata,
    ParameterMetadata,
    PropertyMetadata,
    AttributeMetadata,
    ModuleMetadata,
);

impl Described for BindingFlags {
    fn describe(catalog: &mut TypeCatalog) {
        catalog.opaque::<Self>(|t| t);
    }
}

/// The boundary safety validator.
/// 边界安全验证器。
#[derive(Debug, Clone)]
pub struct BoundarySafety<'c> {
    catalog: &'c TypeCatalog,
    own_namespaces: Vec<String>,
}

impl<'c> BoundarySafety<'c> {
    pub fn new(catalog: &'c TypeCatalog) -> Self {
        Self {
            catalog,
            own_namespaces: vec![OWN_NAMESPACE.to_string()],
        }
    }

    /// Treats `namespace` as belonging to this system, so the properties of
    /// types declared in it are validated too.
    pub fn with_own_namespace(mut self, namespace: impl Into<String>) -> Self {
        let namespace = namespace.into();
        if !namespace.is_empty() && !self.own_namespaces.contains(&namespace) {
            self.own_namespaces.push(namespace);
        }
        self
    }

    pub fn is_safe(&self, ty: &TypeRef) -> bool {
        let mut visited = HashSet::new();
        self.check(ty, &mut visited)
    }

    pub fn ensure_safe(
        &self,
        ty: &TypeRef,
        site: impl Into<String>,
    ) -> Result<(), BoundarySafetyViolation> {
        if self.is_safe(ty) {
            Ok(())
        } else {
            Err(BoundarySafetyViolation {
                type_name: ty.to_string(),
                site: site.into(),
            })
        }
    }

    /// Validates every by-value parameter type and every non-void return type
    /// of a boundary interface. Capability parameters are skipped.
    pub fn ensure_interface(&self, interface: &TypeMetadata) -> Result<(), BoundarySafetyViolation> {
        for method in &interface.methods {
            if !method.is_void() {
                self.ensure_safe(
                    &method.return_type,
                    format!("return type for method {}.{}", interface.full_name, method.name),
                )?;
            }

            for parameter in method.parameters.iter().filter(|p| !p.by_ref) {
                self.ensure_safe(
                    &parameter.ty,
                    format!("parameter type for method {}.{}", interface.full_name, method.name),
                )?;
            }
        }
        Ok(())
    }

    fn check(&self, ty: &TypeRef, visited: &mut HashSet<TypeRef>) -> bool {
        // Extra-argument arrays are the caller's responsibility.
        if *ty == TypeRef::object_array() {
            return true;
        }

        visited.insert(ty.clone());

        if ty.name() == Some(builtin::OBJECT) {
            return false;
        }

        if is_in_namespace(ty.namespace(), REFLECTION_NAMESPACE) {
            return false;
        }

        let meta = match ty {
            TypeRef::ReadOnlyList(element) | TypeRef::Array(element) => {
                if !self.check(element, visited) {
                    return false;
                }
                None
            }
            TypeRef::Named(name) => match self.catalog.get(name) {
                Some(meta) if meta.transferable => Some(meta),
                _ => return false,
            },
        };

        let Some(meta) = meta else {
            return true;
        };

        if self.is_own(meta.namespace()) {
            for property in &meta.properties {
                if !visited.contains(&property.ty) && !self.check(&property.ty, visited) {
                    return false;
                }
            }
        } else if !meta.namespace().is_empty() {
            tracing::debug!(
                type_name = %meta.full_name,
                "type is outside the own namespaces; its properties are not inspected"
            );
        }

        true
    }

    fn is_own(&self, namespace: &str) -> bool {
        self.own_namespaces
            .iter()
            .any(|own| is_in_namespace(namespace, own))
    }
}

/// Validates the message type `T` the way a bus does: the crate's own
/// namespace plus `T`'s root namespace are inspected in depth.
pub fn ensure_transferable<T: Described + ?Sized>(site: &str) -> Result<(), BoundarySafetyViolation> {
    let mut catalog = TypeCatalog::new();
    let ty = catalog.register::<T>();
    let root = ty.namespace().split("::").next().unwrap_or_default().to_string();
    BoundarySafety::new(&catalog)
        .with_own_namespace(root)
        .ensure_safe(&ty, site)
}
