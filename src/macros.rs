/// Provides convenience functions to deconstruct an enum with new-type variants.
#[macro_export]
macro_rules! inner_enum {
    // macro variant for when the enum variant and its type are the same ident
    ($ty:ident, $var:ident) => {
        inner_enum!($ty, $var, $var);
    };

    // macro variant for when the enum variant and its type are potentially different
    ($ty:ident, $var:ident, $var_ty:ty) => {
        impl $ty {
            ::paste::paste! {
                #[doc = "Gets whether `" $ty "` is the variant `" $var "`."]
                pub fn [<is_ $var:snake>](&self) -> bool {
                    matches!(self, $ty::$var(_))
                }

                #[doc = "Gets a reference to `" $ty "` as the variant `" $var "`'s inner value."]
                pub fn [<as_ $var:snake>](&self) -> $crate::Result<&$var_ty> {
                    use $crate::Error;

                    match self {
                        $ty::$var(inner) => Ok(inner),
                        _ => Err(Error::failure(format!(
                            "have variant: {self:?}, expected: {}",
                            stringify!($var)
                        ))),
                    }
                }

                #[doc = "Converts `" $ty "` into the variant `" $var "`'s inner value."]
                pub fn [<into_ $var:snake>](self) -> $crate::Result<$var_ty> {
                    use $crate::Error;

                    match self {
                        $ty::$var(inner) => Ok(inner),
                        _ => Err(Error::failure(format!(
                            "have variant: {self:?}, expected: {}",
                            stringify!($var)
                        ))),
                    }
                }
            }
        }
    };
}
