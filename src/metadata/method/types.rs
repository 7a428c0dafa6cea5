//! Attribute flag sets of methods, method bodies and types.
//!
//! # References
//! - ECMA-335 6th Edition, Partition II, Sections 23.1.10, 23.1.11, 23.1.15 and 25.4

use bitflags::bitflags;

/// Mask of the code type bits in `MethodImplAttributes`
pub const METHOD_IMPL_CODE_TYPE_MASK: u32 = 0x0003;
/// Mask of the layout bits in `TypeAttributes`
pub const TYPE_LAYOUT_MASK: u32 = 0x0018;
/// Mask of the visibility bits in `TypeAttributes`
pub const TYPE_VISIBILITY_MASK: u32 = 0x0007;

bitflags! {
    #[derive(PartialEq, Eq, Clone, Copy, Debug)]
    /// Implementation code type, stored in the low two bits of `MethodImplAttributes`
    pub struct MethodImplCodeType: u32 {
        /// Method implementation is CIL
        const IL = 0x0000;
        /// Method implementation is native
        const NATIVE = 0x0001;
        /// Reserved, shall be zero in conforming implementations
        const OPTIL = 0x0002;
        /// Method implementation is provided by the runtime
        const RUNTIME = 0x0003;
    }
}

impl MethodImplCodeType {
    /// Extract the code type from raw `MethodImplAttributes`
    #[must_use]
    pub fn from_impl_flags(flags: u32) -> Self {
        Self::from_bits_truncate(flags & METHOD_IMPL_CODE_TYPE_MASK)
    }
}

bitflags! {
    #[derive(PartialEq, Eq, Clone, Copy, Debug)]
    /// Implementation options from `MethodImplAttributes`
    pub struct MethodImplOptions: u32 {
        /// Method is not managed code
        const UNMANAGED = 0x0004;
        /// Method cannot be inlined
        const NO_INLINING = 0x0008;
        /// Method is defined, body provided elsewhere
        const FORWARD_REF = 0x0010;
        /// Method is single threaded through the body
        const SYNCHRONIZED = 0x0020;
        /// Method signature is exported exactly as declared
        const PRESERVE_SIG = 0x0080;
        /// Implemented by the runtime itself
        const INTERNAL_CALL = 0x1000;
    }
}

bitflags! {
    #[derive(PartialEq, Eq, Clone, Copy, Debug)]
    /// Modifiers from `MethodAttributes`
    pub struct MethodModifiers: u32 {
        /// Defined on type, not per instance
        const STATIC = 0x0010;
        /// Method cannot be overridden
        const FINAL = 0x0020;
        /// Method is virtual
        const VIRTUAL = 0x0040;
        /// Method hides by name and signature
        const HIDE_BY_SIG = 0x0080;
        /// Method has no implementation
        const ABSTRACT = 0x0400;
        /// Method is special
        const SPECIAL_NAME = 0x0800;
        /// Runtime checks the name encoding
        const RTSPECIAL_NAME = 0x1000;
        /// Implementation is forwarded through platform invoke
        const PINVOKE_IMPL = 0x2000;
    }
}

bitflags! {
    #[derive(PartialEq, Eq, Clone, Copy, Debug)]
    /// Semantics and layout from `TypeAttributes`
    pub struct TypeAttributes: u32 {
        /// Type is an interface
        const INTERFACE = 0x0000_0020;
        /// Type is abstract
        const ABSTRACT = 0x0000_0080;
        /// Type cannot be derived from
        const SEALED = 0x0000_0100;
        /// Name is special
        const SPECIAL_NAME = 0x0000_0400;
        /// Type is imported
        const IMPORT = 0x0000_1000;
        /// Type is serializable
        const SERIALIZABLE = 0x0000_2000;
        /// Type initializer may run before first static field access
        const BEFORE_FIELD_INIT = 0x0010_0000;
        /// Runtime checks the name encoding
        const RTSPECIAL_NAME = 0x0000_0800;
    }
}

impl TypeAttributes {
    /// True for any of the nested visibilities
    #[must_use]
    pub fn is_nested_visibility(flags: u32) -> bool {
        flags & TYPE_VISIBILITY_MASK > 1
    }
}

bitflags! {
    #[derive(PartialEq, Eq, Clone, Copy, Debug)]
    /// Flags of a method body header
    pub struct MethodBodyFlags: u16 {
        /// Tiny method header format
        const TINY_FORMAT = 0x2;
        /// Fat method header format
        const FAT_FORMAT = 0x3;
        /// More data sections follow the code
        const MORE_SECTS = 0x8;
        /// Locals are zero-initialized
        const INIT_LOCALS = 0x10;
    }
}

bitflags! {
    #[derive(PartialEq, Eq, Clone, Copy, Debug)]
    /// Flags of an extra method data section
    pub struct SectionFlags: u8 {
        /// Section holds exception handling clauses
        const EHTABLE = 0x1;
        /// Reserved, shall be 0
        const OPT_ILTABLE = 0x2;
        /// Section uses the fat layout
        const FAT_FORMAT = 0x40;
        /// Another section follows
        const MORE_SECTS = 0x80;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_type() {
        assert_eq!(
            MethodImplCodeType::from_impl_flags(0x1003),
            MethodImplCodeType::RUNTIME
        );
        assert_eq!(MethodImplCodeType::from_impl_flags(0x1000), MethodImplCodeType::IL);
    }

    #[test]
    fn nested_visibility() {
        assert!(!TypeAttributes::is_nested_visibility(0x0010_0001));
        assert!(!TypeAttributes::is_nested_visibility(0x0000_0000));
        assert!(TypeAttributes::is_nested_visibility(0x0000_0002));
        assert!(TypeAttributes::is_nested_visibility(0x0000_0007));
    }
}
