/// Generates the plain 32-bit data registers of the debug module: a
/// newtype wrapper per register, wired up with its MEM-AP offset, its
/// diagnostic name and the `u32` conversions `DmRegister` requires.
macro_rules! dm_data_registers {
    ($($register:ident @ $offset:literal => $name:literal),+ $(,)?) => {
        $(
            struct $register(u32);

            impl DmRegister for $register {
                const OFFSET: u32 = $offset;
                const NAME: &'static str = $name;
            }

            impl From<u32> for $register {
                fn from(value: u32) -> Self {
                    Self(value)
                }
            }

            impl From<$register> for u32 {
                fn from(register: $register) -> Self {
                    register.0
                }
            }
        )+
    };
}
