macro_rules! impl_to_from_u16 {
    ($ident:ident) => {
        impl From<$ident> for u16 {
            fn from(reg: $ident) -> Self {
                reg.0
            }
        }

        impl From<u16> for $ident {
            fn from(int: u16) -> Self {
                Self(int)
            }
        }
    };
}

/// Accessors for the CSR's write-action bits. Reading reports whether the
/// action was requested; clearing consumes the request so the bit never
/// lands in the stored register.
macro_rules! action_bit {
        ($register_name:ident, $clear_name:ident) => {
            concat_idents::concat_idents!(get_name = _, $register_name {
                pub fn $register_name(&self) -> bool {
                    self.get_name()
                }
            });

            concat_idents::concat_idents!(set_name = _set_, $register_name,  {
                pub fn $clear_name(&mut self) {
                    self.set_name(false)
                }
            });
        };
    }

pub(crate) use action_bit;
pub(crate) use impl_to_from_u16;
