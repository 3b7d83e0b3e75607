//! Whole-pipeline tests against synthetic relocatable objects built
//! through the crate's own codec.

use thunker::elf::header::{Header, ET_REL, EV_CURRENT};
use thunker::elf::reloc::{
    Reloc, RelocKind, R_386_32, R_386_PC32, R_X86_64_GOTPCREL, R_X86_64_PC32,
};
use thunker::elf::section_header::{
    SectionHeader, SHF_ALLOC, SHF_EXECINSTR, SHT_PROGBITS, SHT_REL, SHT_STRTAB, SHT_SYMTAB,
};
use thunker::elf::sym::{
    st_info, Sym, STB_GLOBAL, STB_LOCAL, STT_FUNC, STT_NOTYPE, STT_SECTION,
};
use thunker::strtab::Strtab;
use thunker::{parse_signatures, Class, Error, Object, Section, SectionContent};

const SHSTRTAB: usize = 1;
const STRTAB: usize = 2;

fn init_logging() {
    let _ = stderrlog::new().verbosity(4).init();
}

/// NULL + .shstrtab + .strtab skeleton. Content sections carry a
/// placeholder offset of 1 and the header table a placeholder of 2, so the
/// first layout pass compacts the image deterministically with the header
/// table last.
fn base_object(class: Class) -> Object {
    let mut shstrtab = Strtab::new();
    let shstrtab_name = shstrtab.add(b".shstrtab");
    let header = Header {
        e_ident: class.ident(),
        e_type: ET_REL,
        e_machine: class.machine(),
        e_version: EV_CURRENT,
        e_shoff: 2,
        e_ehsize: class.ehdr_size() as u16,
        e_shentsize: class.shdr_size() as u16,
        e_shnum: 1,
        e_shstrndx: SHSTRTAB as u16,
        ..Header::default()
    };
    let mut object = Object::from_parts(
        class,
        header,
        vec![Section {
            header: SectionHeader::default(),
            content: SectionContent::None,
        }],
    );
    object.append_section(Section {
        header: SectionHeader {
            sh_name: shstrtab_name,
            sh_type: SHT_STRTAB,
            sh_offset: 1,
            sh_size: shstrtab.len() as u64,
            sh_addralign: 1,
            ..SectionHeader::default()
        },
        content: SectionContent::Strtab(shstrtab),
    });
    let strtab_name = object.sections[SHSTRTAB].add_str(b".strtab").unwrap();
    object.append_section(Section {
        header: SectionHeader {
            sh_name: strtab_name,
            sh_type: SHT_STRTAB,
            sh_offset: 1,
            sh_size: 1,
            sh_addralign: 1,
            ..SectionHeader::default()
        },
        content: SectionContent::Strtab(Strtab::new()),
    });
    object
}

fn add_symtab(object: &mut Object) -> usize {
    let sh_name = object.sections[SHSTRTAB].add_str(b".symtab").unwrap();
    let ndx = object.append_section(Section {
        header: SectionHeader {
            sh_name,
            sh_type: SHT_SYMTAB,
            sh_offset: 1,
            sh_link: STRTAB as u32,
            sh_info: 1,
            sh_addralign: 8,
            sh_entsize: object.class.sym_size() as u64,
            ..SectionHeader::default()
        },
        content: SectionContent::Symtab(Vec::new()),
    });
    object.sections[ndx].append_sym(Sym::default()).unwrap();
    ndx
}

fn add_symbol(
    object: &mut Object,
    symtab_ndx: usize,
    name: &[u8],
    info: u8,
    shndx: u16,
    value: u64,
    size: u64,
) -> usize {
    let st_name = object.sections[STRTAB].add_str(name).unwrap();
    object.sections[symtab_ndx]
        .append_sym(Sym {
            st_name,
            st_info: info,
            st_other: 0,
            st_shndx: shndx,
            st_value: value,
            st_size: size,
        })
        .unwrap()
}

fn add_progbits(object: &mut Object, name: &[u8], bytes: Vec<u8>) -> usize {
    let sh_name = object.sections[SHSTRTAB].add_str(name).unwrap();
    object.append_section(Section {
        header: SectionHeader {
            sh_name,
            sh_type: SHT_PROGBITS,
            sh_flags: SHF_ALLOC | SHF_EXECINSTR,
            sh_offset: 1,
            sh_size: bytes.len() as u64,
            sh_addralign: 8,
            ..SectionHeader::default()
        },
        content: SectionContent::Raw(bytes),
    })
}

fn add_reloc_table(
    object: &mut Object,
    name: &[u8],
    kind: RelocKind,
    symtab_ndx: usize,
    target_ndx: usize,
    relocs: Vec<Reloc>,
) -> usize {
    let sh_name = object.sections[SHSTRTAB].add_str(name).unwrap();
    let entsize = kind.entsize(object.class) as u64;
    object.append_section(Section {
        header: SectionHeader {
            sh_name,
            sh_type: kind.section_type(),
            sh_offset: 1,
            sh_size: relocs.len() as u64 * entsize,
            sh_link: symtab_ndx as u32,
            sh_info: target_ndx as u32,
            sh_addralign: 8,
            sh_entsize: entsize,
            ..SectionHeader::default()
        },
        content: SectionContent::RelocTable(kind, relocs),
    })
}

fn section_by_name(object: &Object, name: &[u8]) -> usize {
    (0..object.sections.len())
        .find(|&ndx| object.section_name(ndx).unwrap() == name)
        .unwrap_or_else(|| panic!("no section named {}", String::from_utf8_lossy(name)))
}

fn reloc_entries(object: &Object, ndx: usize) -> &[Reloc] {
    match &object.sections[ndx].content {
        SectionContent::RelocTable(_, relocs) => relocs,
        other => panic!("expected a relocation table, got {:?}", other),
    }
}

fn raw_bytes(object: &Object, ndx: usize) -> &[u8] {
    match &object.sections[ndx].content {
        SectionContent::Raw(bytes) => bytes,
        other => panic!("expected raw bytes, got {:?}", other),
    }
}

#[test]
fn identity_round_trip() {
    init_logging();
    let mut object = base_object(Class::Elf64);
    let symtab = add_symtab(&mut object);
    let text = add_progbits(&mut object, b".text", (0..16).collect());
    add_symbol(
        &mut object,
        symtab,
        b"f",
        st_info(STB_GLOBAL, STT_FUNC),
        text as u16,
        0,
        16,
    );
    add_reloc_table(
        &mut object,
        b".rel.text",
        RelocKind::Rel,
        symtab,
        text,
        vec![Reloc {
            r_offset: 4,
            r_sym: 1,
            r_type: R_X86_64_PC32,
            r_addend: 0,
        }],
    );

    let image = object.to_bytes().unwrap();
    let reparsed = Object::parse(&image).unwrap().to_bytes().unwrap();
    assert_eq!(reparsed, image);
}

#[test]
fn switching_to_64_bit_is_always_refused() {
    // with a relocation table
    let mut object = base_object(Class::Elf32);
    let symtab = add_symtab(&mut object);
    let text = add_progbits(&mut object, b".text", vec![0; 8]);
    add_reloc_table(
        &mut object,
        b".rel.text",
        RelocKind::Rel,
        symtab,
        text,
        vec![Reloc {
            r_offset: 0,
            r_sym: 1,
            r_type: R_386_32,
            r_addend: 0,
        }],
    );
    let image = object.to_bytes().unwrap();
    assert!(matches!(
        Object::parse(&image).unwrap().switch_bitness(),
        Err(Error::UnsupportedBitnessChange)
    ));

    // and just as firmly without one
    let mut object = base_object(Class::Elf32);
    add_symtab(&mut object);
    add_progbits(&mut object, b".text", vec![0x90; 8]);
    let image = object.to_bytes().unwrap();
    assert!(matches!(
        Object::parse(&image).unwrap().switch_bitness(),
        Err(Error::UnsupportedBitnessChange)
    ));
}

#[test]
fn bitness_switch_and_addend_folding() {
    init_logging();
    let mut object = base_object(Class::Elf64);
    let symtab = add_symtab(&mut object);
    let text = add_progbits(&mut object, b".text", (0..0x20).collect());
    add_symbol(&mut object, symtab, b"", st_info(STB_LOCAL, STT_SECTION), text as u16, 0, 0);
    add_symbol(&mut object, symtab, b"aux", st_info(STB_LOCAL, STT_NOTYPE), text as u16, 0, 0);
    let target_sym = add_symbol(
        &mut object,
        symtab,
        b"g",
        st_info(STB_GLOBAL, STT_NOTYPE),
        0,
        0,
        0,
    );
    assert_eq!(target_sym, 3);
    object.sections[symtab].header.sh_info = 3;
    add_reloc_table(
        &mut object,
        b".rela.text",
        RelocKind::Rela,
        symtab,
        text,
        vec![Reloc {
            r_offset: 0x10,
            r_sym: 3,
            r_type: R_X86_64_PC32,
            r_addend: -4,
        }],
    );

    let image = object.to_bytes().unwrap();
    let mut object = Object::parse(&image).unwrap().switch_bitness().unwrap();
    object.rela_to_rel(true).unwrap();

    assert_eq!(object.class, Class::Elf32);
    assert_eq!(object.header.e_machine, Class::Elf32.machine());
    assert_eq!(object.header.e_ident, Class::Elf32.ident());
    assert_eq!(object.header.e_ehsize as usize, Class::Elf32.ehdr_size());
    assert_eq!(object.header.e_shentsize as usize, Class::Elf32.shdr_size());

    // tabular sections re-emit in the narrow layout with identical fields
    assert_eq!(object.sections[symtab].header.sh_entsize, 16);
    assert_eq!(object.sections[symtab].header.sh_size, 4 * 16);
    let syms = object.symbols(symtab).unwrap();
    assert_eq!(syms[3].st_bind(), STB_GLOBAL);
    assert_eq!(object.symbol_name(symtab, 3).unwrap(), b"g");

    let rel = section_by_name(&object, b".rel.text");
    assert_eq!(object.sections[rel].header.sh_type, SHT_REL);
    assert_eq!(object.sections[rel].header.sh_entsize, 8);
    let entries = reloc_entries(&object, rel);
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].r_offset, 0x10);
    assert_eq!(entries[0].r_sym, 3);
    assert_eq!(entries[0].r_type, R_386_PC32);

    let text = section_by_name(&object, b".text");
    assert_eq!(
        &raw_bytes(&object, text)[0x10..0x14],
        &[0xfc, 0xff, 0xff, 0xff]
    );

    // the physical image survives another parse
    let image32 = object.to_bytes().unwrap();
    let reparsed = Object::parse(&image32).unwrap();
    assert_eq!(reparsed.class, Class::Elf32);
    assert_eq!(
        reparsed.section_name(rel).unwrap(),
        b".rel.text"
    );
}

#[test]
fn unsupported_relocation_type_is_rejected() {
    let mut object = base_object(Class::Elf64);
    let symtab = add_symtab(&mut object);
    let text = add_progbits(&mut object, b".text", vec![0; 0x20]);
    add_symbol(
        &mut object,
        symtab,
        b"g",
        st_info(STB_GLOBAL, STT_NOTYPE),
        0,
        0,
        0,
    );
    add_reloc_table(
        &mut object,
        b".rela.text",
        RelocKind::Rela,
        symtab,
        text,
        vec![Reloc {
            r_offset: 0,
            r_sym: 1,
            r_type: R_X86_64_GOTPCREL,
            r_addend: -4,
        }],
    );
    let image = object.to_bytes().unwrap();
    assert!(matches!(
        Object::parse(&image).unwrap().switch_bitness(),
        Err(Error::UnsupportedReloc {
            typ: R_X86_64_GOTPCREL,
            ..
        })
    ));
}

#[test]
fn addend_outside_the_patched_section_is_rejected() {
    let mut object = base_object(Class::Elf64);
    let symtab = add_symtab(&mut object);
    let text = add_progbits(&mut object, b".text", vec![0; 8]);
    add_symbol(
        &mut object,
        symtab,
        b"g",
        st_info(STB_GLOBAL, STT_NOTYPE),
        0,
        0,
        0,
    );
    add_reloc_table(
        &mut object,
        b".rela.text",
        RelocKind::Rela,
        symtab,
        text,
        vec![Reloc {
            r_offset: 6, // 6 + 4 reaches past the 8-byte section
            r_sym: 1,
            r_type: R_X86_64_PC32,
            r_addend: -4,
        }],
    );
    let image = object.to_bytes().unwrap();
    let mut object = Object::parse(&image).unwrap().switch_bitness().unwrap();
    assert!(matches!(
        object.rela_to_rel(true),
        Err(Error::AddendOutOfRange { .. })
    ));
}

#[test]
fn thunks_for_a_defined_function() {
    init_logging();
    let mut object = base_object(Class::Elf64);
    let symtab = add_symtab(&mut object);
    let text = add_progbits(&mut object, b".text", vec![0x90; 16]);
    add_symbol(
        &mut object,
        symtab,
        b"foo",
        st_info(STB_GLOBAL, STT_FUNC),
        text as u16,
        0,
        16,
    );

    let image = object.to_bytes().unwrap();
    let mut object = Object::parse(&image).unwrap().switch_bitness().unwrap();
    let signatures = parse_signatures("foo int int\n").unwrap();
    object.add_thunks(&signatures).unwrap();

    let text_in = section_by_name(&object, b".text.thunkin");
    let syms = object.symbols(symtab).unwrap();
    // null, demoted foo, four section symbols, then the thunk export
    assert_eq!(syms.len(), 7);
    assert_eq!(syms[1].st_bind(), STB_LOCAL);
    assert_eq!(syms[1].st_type(), STT_FUNC);
    assert_eq!(object.symbol_name(symtab, 1).unwrap(), b"foo");
    let thunk_sym = syms[6];
    assert_eq!(thunk_sym.st_bind(), STB_GLOBAL);
    assert_eq!(thunk_sym.st_type(), STT_FUNC);
    assert_eq!(thunk_sym.st_shndx as usize, text_in);
    assert_eq!(thunk_sym.st_value, 0);
    assert_eq!(thunk_sym.st_size, 41); // int(int) inbound stub length
    assert_eq!(object.symbol_name(symtab, 6).unwrap(), b"foo");

    // LOCAL/GLOBAL pivot equals the pre-thunk symbol count
    assert_eq!(object.sections[symtab].header.sh_info, 6);

    // three relocations per stub, at the slot offsets, already REL
    let rel_text_in = section_by_name(&object, b".rel.text.thunkin");
    assert_eq!(object.sections[rel_text_in].header.sh_type, SHT_REL);
    assert_eq!(
        object.sections[rel_text_in].header.sh_info as usize,
        text_in
    );
    let entries = reloc_entries(&object, rel_text_in);
    assert_eq!(entries.len(), 3);
    assert_eq!((entries[0].r_offset, entries[0].r_sym, entries[0].r_type), (8, 4, R_386_32));
    assert_eq!((entries[1].r_offset, entries[1].r_sym, entries[1].r_type), (17, 1, R_386_PC32));
    assert_eq!((entries[2].r_offset, entries[2].r_sym, entries[2].r_type), (31, 4, R_386_32));

    // folded addends: first jump-table entry sits at 0, the second at 8,
    // and the call displacement starts at -4
    let stub = raw_bytes(&object, text_in);
    assert_eq!(stub.len(), 41);
    assert_eq!(&stub[8..12], &[0, 0, 0, 0]);
    assert_eq!(&stub[17..21], &[0xfc, 0xff, 0xff, 0xff]);
    assert_eq!(&stub[31..35], &[8, 0, 0, 0]);

    // jump table: each entry is the continuation address plus a selector,
    // inbound entries switch to 0x33 then back through 0x23
    let rodata_in = section_by_name(&object, b".rodata.thunkin");
    assert_eq!(
        raw_bytes(&object, rodata_in),
        &[12, 0, 0, 0, 0x33, 0, 0, 0, 35, 0, 0, 0, 0x23, 0, 0, 0]
    );
    let rel_rodata_in = section_by_name(&object, b".rel.rodata.thunkin");
    let entries = reloc_entries(&object, rel_rodata_in);
    assert_eq!((entries[0].r_offset, entries[0].r_sym, entries[0].r_type), (0, 2, R_386_32));
    assert_eq!((entries[1].r_offset, entries[1].r_sym, entries[1].r_type), (8, 2, R_386_32));

    // the final image is still a valid 32-bit relocatable
    let final_image = object.to_bytes().unwrap();
    let reparsed = Object::parse(&final_image).unwrap();
    assert_eq!(reparsed.sections.len(), 13);
}

#[test]
fn thunks_for_an_undefined_external() {
    let mut object = base_object(Class::Elf64);
    let symtab = add_symtab(&mut object);
    let text = add_progbits(&mut object, b".text", vec![0x90; 8]);
    add_symbol(
        &mut object,
        symtab,
        b"bar",
        st_info(STB_GLOBAL, STT_NOTYPE),
        0,
        0,
        0,
    );
    add_reloc_table(
        &mut object,
        b".rela.text",
        RelocKind::Rela,
        symtab,
        text,
        vec![Reloc {
            r_offset: 4,
            r_sym: 1,
            r_type: R_X86_64_PC32,
            r_addend: -4,
        }],
    );

    let image = object.to_bytes().unwrap();
    let mut object = Object::parse(&image).unwrap().switch_bitness().unwrap();
    object.rela_to_rel(true).unwrap();
    let signatures = parse_signatures("bar longlong ptr int longlong\n").unwrap();
    object.add_thunks(&signatures).unwrap();

    let text_out = section_by_name(&object, b".text.thunkout");
    let syms = object.symbols(symtab).unwrap();
    assert_eq!(syms.len(), 7);

    // the original symbol became the stub
    assert_eq!(syms[1].st_bind(), STB_LOCAL);
    assert_eq!(syms[1].st_type(), STT_NOTYPE);
    assert_eq!(syms[1].st_shndx as usize, text_out);
    assert_eq!(syms[1].st_value, 0);
    assert_eq!(syms[1].st_size, 75); // longlong(ptr, int, longlong) outbound stub
    assert_eq!(object.symbol_name(symtab, 1).unwrap(), b"bar");

    // a fresh import with the same name stays undefined
    assert_eq!(syms[6].st_bind(), STB_GLOBAL);
    assert_eq!(syms[6].st_type(), STT_NOTYPE);
    assert_eq!(syms[6].st_shndx, 0);
    assert_eq!(object.symbol_name(symtab, 6).unwrap(), b"bar");

    assert_eq!(object.sections[symtab].header.sh_info, 6);

    // the pre-existing program relocation still references symbol 1 and
    // thereby lands on the thunk
    let rel_text = section_by_name(&object, b".rel.text");
    let entries = reloc_entries(&object, rel_text);
    assert_eq!(entries[0].r_sym, 1);
    assert_eq!(entries[0].r_type, R_386_PC32);

    // stub wiring: jump table first, then the call to the new import
    let rel_text_out = section_by_name(&object, b".rel.text.thunkout");
    let rodata_out_sym = 5;
    let entries = reloc_entries(&object, rel_text_out);
    assert_eq!(
        (entries[0].r_offset, entries[0].r_sym, entries[0].r_type),
        (29, rodata_out_sym, R_386_32)
    );
    assert_eq!((entries[1].r_offset, entries[1].r_sym, entries[1].r_type), (40, 6, R_386_PC32));
    assert_eq!(
        (entries[2].r_offset, entries[2].r_sym, entries[2].r_type),
        (47, rodata_out_sym, R_386_32)
    );

    // outbound jump table enters compatibility mode first
    let rodata_out = section_by_name(&object, b".rodata.thunkout");
    assert_eq!(
        raw_bytes(&object, rodata_out),
        &[33, 0, 0, 0, 0x23, 0, 0, 0, 51, 0, 0, 0, 0x33, 0, 0, 0]
    );
}

#[test]
fn layout_is_non_overlapping_and_aligned_after_thunks() {
    let mut object = base_object(Class::Elf64);
    let symtab = add_symtab(&mut object);
    let text = add_progbits(&mut object, b".text", vec![0x90; 40]);
    add_symbol(
        &mut object,
        symtab,
        b"foo",
        st_info(STB_GLOBAL, STT_FUNC),
        text as u16,
        0,
        40,
    );
    add_symbol(
        &mut object,
        symtab,
        b"bar",
        st_info(STB_GLOBAL, STT_NOTYPE),
        0,
        0,
        0,
    );

    let image = object.to_bytes().unwrap();
    let signatures = parse_signatures("foo int int\nbar void longlong\n").unwrap();
    let final_image = thunker::convert(&image, &signatures).unwrap();

    let object = Object::parse(&final_image).unwrap();
    let mut regions: Vec<(u64, u64, u64)> = vec![(0, object.class.ehdr_size() as u64, 1)];
    for section in &object.sections {
        if section.has_content() {
            regions.push((
                section.header.sh_offset,
                section.header.sh_size,
                section.header.sh_addralign.max(1),
            ));
        }
    }
    regions.push((
        object.header.e_shoff,
        object.sections.len() as u64 * object.class.shdr_size() as u64,
        8,
    ));
    regions.sort_by_key(|&(offset, ..)| offset);
    let mut end = 0;
    for (offset, length, alignment) in regions {
        assert!(offset >= end, "region at {:#x} overlaps previous end {:#x}", offset, end);
        assert_eq!(offset % alignment, 0, "region at {:#x} ignores alignment {}", offset, alignment);
        end = offset + length;
    }
    assert_eq!(end as usize, final_image.len());
}

#[test]
fn object_without_symtab_is_left_alone() {
    let mut object = base_object(Class::Elf64);
    add_progbits(&mut object, b".text", vec![0x90; 8]);
    let image = object.to_bytes().unwrap();
    let mut object = Object::parse(&image).unwrap().switch_bitness().unwrap();
    let before = object.sections.len();
    object.add_thunks(&[]).unwrap();
    assert_eq!(object.sections.len(), before);
}
