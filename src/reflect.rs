//! # Reflection Metadata Module / 反射元数据模块
//!
//! This module defines the metadata model that every other component queries
//! instead of a live reflection API: type references, type and method
//! descriptions, properties, attributes and binding flags.
//!
//! 此模块定义了其他所有组件所查询的元数据模型，用以替代实时反射 API：
//! 类型引用、类型与方法描述、属性、特性以及绑定标志。
//!
//! Values of these types are serializable in form, but they describe the
//! loaded-module set of one side of the isolation boundary and are therefore
//! never allowed to cross it by value.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

/// Namespace that all reflection metadata types live in.
pub const REFLECTION_NAMESPACE: &str = module_path!();

/// Names of the built-in types every catalog knows about.
/// 每个类型目录都认识的内置类型名称。
pub mod builtin {
    pub const OBJECT: &str = "object";
    pub const VOID: &str = "void";
    pub const BOOL: &str = "bool";
    pub const CHAR: &str = "char";
    pub const I32: &str = "i32";
    pub const I64: &str = "i64";
    pub const U8: &str = "u8";
    pub const U32: &str = "u32";
    pub const U64: &str = "u64";
    pub const USIZE: &str = "usize";
    pub const F64: &str = "f64";
    pub const STRING: &str = "string";
    pub const DURATION: &str = "duration";
    pub const TIMESTAMP: &str = "timestamp";
    pub const PATH: &str = "path";

    /// Every built-in name, in no particular order.
    pub const ALL: &[&str] = &[
        OBJECT, VOID, BOOL, CHAR, I32, I64, U8, U32, U64, USIZE, F64, STRING, DURATION, TIMESTAMP,
        PATH,
    ];
}

bitflags! {
    /// Selects methods by access level and storage kind.
    /// A method matches only when both its access bit and its storage bit are set.
    ///
    /// 按访问级别和存储类型选择方法。
    /// 只有当方法的访问位和存储位都被设置时才会匹配。
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct BindingFlags: u8 {
        const PUBLIC = 1 << 0;
        const NON_PUBLIC = 1 << 1;
        const INSTANCE = 1 << 2;
        const STATIC = 1 << 3;
    }
}

/// Error returned when a textual type reference cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid type reference `{0}`")]
pub struct TypeRefParseError(pub String);

/// A reference to a type by name, possibly wrapped in an array or a read-only list.
///
/// The text form is `name`, `T[]` for arrays and `list<T>` for read-only lists.
/// 文本形式为 `name`，数组为 `T[]`，只读列表为 `list<T>`。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum TypeRef {
    /// A named type, e.g. `string` or `calculator::CalculatorTests`.
    Named(String),
    /// A fixed array of the element type.
    Array(Box<TypeRef>),
    /// A generic read-only sequence of the element type.
    ReadOnlyList(Box<TypeRef>),
}

impl TypeRef {
    pub fn named(name: impl Into<String>) -> Self {
        TypeRef::Named(name.into())
    }

    pub fn array(element: TypeRef) -> Self {
        TypeRef::Array(Box::new(element))
    }

    pub fn list(element: TypeRef) -> Self {
        TypeRef::ReadOnlyList(Box::new(element))
    }

    /// A reference to the Rust type `T`, named by its full path.
    pub fn of<T: ?Sized>() -> Self {
        TypeRef::Named(std::any::type_name::<T>().to_string())
    }

    pub fn object() -> Self {
        TypeRef::named(builtin::OBJECT)
    }

    pub fn object_array() -> Self {
        TypeRef::array(TypeRef::object())
    }

    pub fn void() -> Self {
        TypeRef::named(builtin::VOID)
    }

    pub fn string() -> Self {
        TypeRef::named(builtin::STRING)
    }

    pub fn is_void(&self) -> bool {
        matches!(self, TypeRef::Named(name) if name == builtin::VOID)
    }

    pub fn is_array(&self) -> bool {
        matches!(self, TypeRef::Array(_))
    }

    /// The type name, if this is a named type.
    pub fn name(&self) -> Option<&str> {
        match self {
            TypeRef::Named(name) => Some(name),
            _ => None,
        }
    }

    /// The namespace part of a named type (`a::b` for `a::b::C`), empty for
    /// built-ins and for arrays and lists.
    pub fn namespace(&self) -> &str {
        match self {
            TypeRef::Named(name) => namespace_of(name),
            _ => "",
        }
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeRef::Named(name) => f.write_str(name),
            TypeRef::Array(element) => write!(f, "{element}[]"),
            TypeRef::ReadOnlyList(element) => write!(f, "list<{element}>"),
        }
    }
}

impl FromStr for TypeRef {
    type Err = TypeRefParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let text = s.trim();
        if text.is_empty() || text.chars().any(char::is_whitespace) {
            return Err(TypeRefParseError(s.to_string()));
        }
        if let Some(element) = text.strip_suffix("[]") {
            return Ok(TypeRef::array(element.parse().map_err(|_| TypeRefParseError(s.to_string()))?));
        }
        if let Some(inner) = text.strip_prefix("list<").and_then(|rest| rest.strip_suffix('>')) {
            return Ok(TypeRef::list(inner.parse().map_err(|_| TypeRefParseError(s.to_string()))?));
        }
        Ok(TypeRef::Named(text.to_string()))
    }
}

impl TryFrom<String> for TypeRef {
    type Error = TypeRefParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TypeRef> for String {
    fn from(value: TypeRef) -> Self {
        value.to_string()
    }
}

/// Returns `true` if `namespace` is `root` or nested inside it.
pub fn is_in_namespace(namespace: &str, root: &str) -> bool {
    namespace == root
        || namespace
            .strip_prefix(root)
            .is_some_and(|rest| rest.starts_with("::"))
}

fn namespace_of(full_name: &str) -> &str {
    // Generic arguments belong to the type, not to its namespace.
    let base = full_name.split('<').next().unwrap_or(full_name);
    base.rsplit_once("::").map(|(ns, _)| ns).unwrap_or("")
}

/// A marker attached to a method, e.g. `Skip("not on CI")`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeMetadata {
    pub name: String,
    #[serde(default)]
    pub argument: Option<String>,
}

/// One declared parameter of a method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterMetadata {
    pub name: String,
    pub ty: TypeRef,
    /// `true` when the parameter is a by-reference capability (a remote handle)
    /// rather than by-value data.
    /// 当参数是按引用的能力（远程句柄）而不是按值数据时为 `true`。
    #[serde(default)]
    pub by_ref: bool,
}

/// Metadata describing one method declared on a type.
/// 描述类型上声明的一个方法的元数据。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodMetadata {
    pub name: String,
    /// Full name of the type that declares this method.
    pub declaring_type: String,
    pub is_public: bool,
    pub is_static: bool,
    #[serde(default)]
    pub parameters: Vec<ParameterMetadata>,
    pub return_type: TypeRef,
    #[serde(default)]
    pub attributes: Vec<AttributeMetadata>,
}

impl MethodMetadata {
    /// A public, instance, parameterless method returning `void`.
    pub fn new(declaring_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            declaring_type: declaring_type.into(),
            is_public: true,
            is_static: false,
            parameters: Vec::new(),
            return_type: TypeRef::void(),
            attributes: Vec::new(),
        }
    }

    pub fn non_public(mut self) -> Self {
        self.is_public = false;
        self
    }

    pub fn as_static(mut self) -> Self {
        self.is_static = true;
        self
    }

    pub fn parameter(mut self, name: impl Into<String>, ty: TypeRef) -> Self {
        self.parameters.push(ParameterMetadata {
            name: name.into(),
            ty,
            by_ref: false,
        });
        self
    }

    /// Adds a by-reference capability parameter.
    pub fn capability(mut self, name: impl Into<String>, ty: TypeRef) -> Self {
        self.parameters.push(ParameterMetadata {
            name: name.into(),
            ty,
            by_ref: true,
        });
        self
    }

    pub fn returns(mut self, ty: TypeRef) -> Self {
        self.return_type = ty;
        self
    }

    pub fn attribute(mut self, name: impl Into<String>, argument: Option<String>) -> Self {
        self.attributes.push(AttributeMetadata {
            name: name.into(),
            argument,
        });
        self
    }

    pub fn is_void(&self) -> bool {
        self.return_type.is_void()
    }

    pub fn find_attribute(&self, name: &str) -> Option<&AttributeMetadata> {
        self.attributes.iter().find(|a| a.name == name)
    }

    /// The access and storage bits describing this method.
    pub fn binding_flags(&self) -> BindingFlags {
        let access = if self.is_public {
            BindingFlags::PUBLIC
        } else {
            BindingFlags::NON_PUBLIC
        };
        let storage = if self.is_static {
            BindingFlags::STATIC
        } else {
            BindingFlags::INSTANCE
        };
        access | storage
    }
}

/// One declared property of a type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyMetadata {
    pub name: String,
    pub ty: TypeRef,
    #[serde(default = "default_true")]
    pub is_public: bool,
    #[serde(default)]
    pub is_static: bool,
}

fn default_true() -> bool {
    true
}

/// Metadata describing a type: its name, its transferability marker,
/// its properties and its declared methods.
///
/// 描述一个类型的元数据：名称、可传输标记、属性以及声明的方法。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeMetadata {
    pub full_name: String,
    /// The serializability marker: the type declares itself as
    /// cross-boundary transferable.
    #[serde(default)]
    pub transferable: bool,
    #[serde(default)]
    pub properties: Vec<PropertyMetadata>,
    #[serde(default)]
    pub methods: Vec<MethodMetadata>,
}

impl TypeMetadata {
    pub fn new(full_name: impl Into<String>) -> Self {
        Self {
            full_name: full_name.into(),
            transferable: false,
            properties: Vec::new(),
            methods: Vec::new(),
        }
    }

    pub fn transferable(mut self) -> Self {
        self.transferable = true;
        self
    }

    pub fn property(mut self, name: impl Into<String>, ty: TypeRef) -> Self {
        self.properties.push(PropertyMetadata {
            name: name.into(),
            ty,
            is_public: true,
            is_static: false,
        });
        self
    }

    /// Adds a method; its declaring type is set to this type.
    pub fn method(mut self, mut method: MethodMetadata) -> Self {
        method.declaring_type = self.full_name.clone();
        self.methods.push(method);
        self
    }

    pub fn type_ref(&self) -> TypeRef {
        TypeRef::named(self.full_name.clone())
    }

    pub fn namespace(&self) -> &str {
        namespace_of(&self.full_name)
    }

    /// The last path segment of the full name.
    pub fn simple_name(&self) -> &str {
        let base = self.full_name.split('<').next().unwrap_or(&self.full_name);
        base.rsplit_once("::").map(|(_, name)| name).unwrap_or(base)
    }

    pub fn methods_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a MethodMetadata> + 'a {
        self.methods.iter().filter(move |m| m.name == name)
    }
}

/// Metadata describing a loaded test module.
/// 描述已加载测试模块的元数据。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleMetadata {
    pub name: String,
    pub location: PathBuf,
    pub types: Vec<TypeMetadata>,
}

impl ModuleMetadata {
    pub fn find_type(&self, full_name: &str) -> Option<&TypeMetadata> {
        self.types.iter().find(|t| t.full_name == full_name)
    }
}
